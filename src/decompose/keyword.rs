//! Keyword-rule decomposition.

use async_trait::async_trait;

use crate::decompose::{DecompositionStrategy, primary_spec, subtask_spec};
use crate::task::{Payload, TaskSpec};

struct Rule {
    keywords: &'static [&'static str],
    task_type: &'static str,
    priority: i32,
    description: &'static str,
}

/// Checked in order; each matching rule adds one subtask.
const RULES: &[Rule] = &[
    Rule {
        keywords: &["code", "review"],
        task_type: "generation",
        priority: 4,
        description: "Code analysis subtask",
    },
    Rule {
        keywords: &["test", "validate"],
        task_type: "testing",
        priority: 3,
        description: "Testing subtask",
    },
];

/// Primary analysis task plus one subtask per matching keyword rule.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordStrategy;

#[async_trait]
impl DecompositionStrategy for KeywordStrategy {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn decompose(&self, description: &str, context: &Payload) -> Vec<TaskSpec> {
        let lowered = description.to_lowercase();
        let mut specs = vec![primary_spec(description, context)];

        for rule in RULES {
            if rule.keywords.iter().any(|k| lowered.contains(k)) {
                specs.push(subtask_spec(rule.task_type, rule.priority, rule.description, context));
            }
        }
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn types(description: &str) -> Vec<String> {
        KeywordStrategy
            .decompose(description, &Payload::new())
            .await
            .into_iter()
            .map(|s| s.task_type)
            .collect()
    }

    #[tokio::test]
    async fn plain_request_is_primary_only() {
        assert_eq!(types("Summarize the quarterly numbers").await, ["analysis"]);
    }

    #[tokio::test]
    async fn keywords_add_subtasks_in_rule_order() {
        assert_eq!(
            types("Validate and REVIEW this module").await,
            ["analysis", "generation", "testing"]
        );
        assert_eq!(types("write tests").await, ["analysis", "testing"]);
        assert_eq!(types("Code cleanup").await, ["analysis", "generation"]);
    }

    #[tokio::test]
    async fn subtasks_carry_context() {
        let mut context = Payload::new();
        context.insert("repo".into(), "core".into());

        let specs = KeywordStrategy.decompose("review the code", &context).await;
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].payload["description"], "review the code");
        assert_eq!(specs[1].payload["description"], "Code analysis subtask");
        assert_eq!(specs[1].payload["context"]["repo"], "core");
        assert_eq!(specs[1].priority, 4);
        assert_eq!(specs[1].max_attempts, Some(3));
    }
}
