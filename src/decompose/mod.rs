//! Task decomposition: splitting a free-text request into an ordered task list.
//!
//! Strategies are pluggable. Whatever a strategy returns, the `Decomposer`
//! guarantees at least the primary analysis task comes back.

pub mod keyword;
pub mod template;

use std::sync::Arc;

use async_trait::async_trait;

use crate::task::{Payload, TaskSpec};

pub use keyword::KeywordStrategy;
pub use template::{TemplateStep, TemplateStrategy};

/// Task type of the primary task every decomposition starts with.
pub const PRIMARY_TASK_TYPE: &str = "analysis";
pub const PRIMARY_PRIORITY: i32 = 5;
pub const DECOMPOSED_MAX_ATTEMPTS: u32 = 3;

/// Turns a request description into task specs.
#[async_trait]
pub trait DecompositionStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Produce specs in submission order. May return an empty list.
    async fn decompose(&self, description: &str, context: &Payload) -> Vec<TaskSpec>;
}

/// The primary "analysis" task for a request.
pub fn primary_spec(description: &str, context: &Payload) -> TaskSpec {
    subtask_spec(PRIMARY_TASK_TYPE, PRIMARY_PRIORITY, description, context)
}

/// A decomposed task carrying `description` and `context` in its payload.
pub fn subtask_spec(task_type: &str, priority: i32, description: &str, context: &Payload) -> TaskSpec {
    TaskSpec::new(task_type)
        .with_priority(priority)
        .with_field("description", description)
        .with_field("context", context.clone())
        .with_max_attempts(DECOMPOSED_MAX_ATTEMPTS)
}

/// Runs a strategy and enforces the non-empty contract.
#[derive(Clone)]
pub struct Decomposer {
    strategy: Arc<dyn DecompositionStrategy>,
}

impl Decomposer {
    pub fn new(strategy: Arc<dyn DecompositionStrategy>) -> Self {
        Self { strategy }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub async fn decompose(&self, description: &str, context: &Payload) -> Vec<TaskSpec> {
        let mut specs = self.strategy.decompose(description, context).await;
        if specs.is_empty() {
            tracing::debug!(
                strategy = self.strategy.name(),
                "Strategy produced no tasks, using primary task"
            );
            specs.push(primary_spec(description, context));
        }

        tracing::info!(
            strategy = self.strategy.name(),
            tasks = specs.len(),
            "Decomposed request"
        );
        specs
    }
}

impl Default for Decomposer {
    fn default() -> Self {
        Self::new(Arc::new(KeywordStrategy))
    }
}
