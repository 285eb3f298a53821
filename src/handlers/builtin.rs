//! Built-in general handler, registered by default as the fallback.

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::handlers::handler::{HandlerContext, TaskHandler};
use crate::task::Task;

/// Acknowledges any task and echoes what it was given.
///
/// Embedders normally replace this with their own general-purpose handler;
/// it exists so unmatched task types always complete rather than fail.
#[derive(Debug, Default)]
pub struct GeneralHandler;

#[async_trait]
impl TaskHandler for GeneralHandler {
    async fn handle(
        &self,
        ctx: HandlerContext,
        task: Task,
    ) -> Result<serde_json::Value, HandlerError> {
        tracing::debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            worker_id = %ctx.worker_id,
            "General handler executing"
        );

        let mut keys: Vec<&String> = task.payload.keys().collect();
        keys.sort();

        Ok(serde_json::json!({
            "handled_by": "general",
            "task_type": task.task_type,
            "description": task.description(),
            "payload_keys": keys,
            "attempt": ctx.attempt,
        }))
    }
}
