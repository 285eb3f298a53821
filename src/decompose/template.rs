//! Template decomposition: regex-matched request shapes with fixed steps.

use async_trait::async_trait;
use regex::Regex;

use crate::decompose::{DecompositionStrategy, primary_spec, subtask_spec};
use crate::error::ConfigError;
use crate::task::{Payload, TaskSpec};

/// One subtask produced when a template matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateStep {
    pub task_type: String,
    pub priority: i32,
    /// May reference capture groups of the template pattern, e.g. `$name`.
    pub description: String,
}

impl TemplateStep {
    pub fn new(task_type: impl Into<String>, priority: i32, description: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            priority,
            description: description.into(),
        }
    }
}

struct Template {
    name: String,
    pattern: Regex,
    steps: Vec<TemplateStep>,
}

/// Primary task followed by the steps of the first matching template.
#[derive(Default)]
pub struct TemplateStrategy {
    templates: Vec<Template>,
}

impl TemplateStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template. Patterns are matched case-insensitively in the order
    /// they were added.
    pub fn with_template(
        mut self,
        name: impl Into<String>,
        pattern: &str,
        steps: Vec<TemplateStep>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let pattern = Regex::new(&format!("(?i){pattern}")).map_err(|e| {
            ConfigError::InvalidValue {
                key: format!("template.{name}"),
                message: e.to_string(),
            }
        })?;
        self.templates.push(Template {
            name,
            pattern,
            steps,
        });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[async_trait]
impl DecompositionStrategy for TemplateStrategy {
    fn name(&self) -> &str {
        "template"
    }

    async fn decompose(&self, description: &str, context: &Payload) -> Vec<TaskSpec> {
        let mut specs = vec![primary_spec(description, context)];

        let matched = self
            .templates
            .iter()
            .find_map(|t| t.pattern.captures(description).map(|caps| (t, caps)));

        if let Some((template, caps)) = matched {
            tracing::debug!(template = %template.name, "Request matched template");
            for step in &template.steps {
                let mut text = String::new();
                caps.expand(&step.description, &mut text);
                specs.push(subtask_spec(&step.task_type, step.priority, &text, context));
            }
        }
        specs
    }
}
