//! Handler abstraction: the embedder-supplied work for a task type.

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::HandlerError;
use crate::task::Task;

/// Per-invocation context handed to a handler.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub task_id: Uuid,
    pub worker_id: String,
    /// 1-based attempt number of this invocation.
    pub attempt: u32,
    /// Cancelled on supervisor stop, worker retirement or task timeout.
    /// Long-running handlers should poll it.
    pub cancel: CancellationToken,
}

impl HandlerContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the invocation has been asked to stop.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Work function for one or more task types.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute the task. The returned value becomes the task result; an
    /// error is recorded on the task and counts as a failed attempt.
    async fn handle(
        &self,
        ctx: HandlerContext,
        task: Task,
    ) -> Result<serde_json::Value, HandlerError>;
}

/// Adapter turning an async closure into a `TaskHandler`.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(HandlerContext, Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send,
{
    async fn handle(
        &self,
        ctx: HandlerContext,
        task: Task,
    ) -> Result<serde_json::Value, HandlerError> {
        (self.0)(ctx, task).await
    }
}
