//! Handler registry mapping task types to work functions.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::HandlerError;
use crate::handlers::handler::{FnHandler, HandlerContext, TaskHandler};
use crate::task::Task;
use crate::worker::GENERAL_CAPABILITY;

/// Registry of task handlers. Unmatched types resolve to the general handler.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler, replacing any previous one for the type.
    pub async fn register(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        let replaced = self
            .handlers
            .write()
            .await
            .insert(task_type.clone(), handler)
            .is_some();
        if replaced {
            tracing::debug!(task_type = %task_type, "Replaced handler");
        } else {
            tracing::debug!(task_type = %task_type, "Registered handler");
        }
    }

    /// Register a handler (sync version for startup).
    pub fn register_sync(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        if let Ok(mut handlers) = self.handlers.try_write() {
            handlers.insert(task_type.clone(), handler);
            tracing::debug!(task_type = %task_type, "Registered handler");
        }
    }

    /// Register an async closure as the handler for a type.
    pub async fn register_fn<F, Fut>(&self, task_type: impl Into<String>, f: F)
    where
        F: Fn(HandlerContext, Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
    {
        self.register(task_type, Arc::new(FnHandler(f))).await;
    }

    /// Handler for a task type, falling back to the general handler.
    /// Returns the key that matched alongside the handler.
    pub async fn resolve(&self, task_type: &str) -> Option<(String, Arc<dyn TaskHandler>)> {
        let handlers = self.handlers.read().await;
        if let Some(handler) = handlers.get(task_type) {
            return Some((task_type.to_string(), handler.clone()));
        }
        handlers
            .get(GENERAL_CAPABILITY)
            .map(|handler| (GENERAL_CAPABILITY.to_string(), handler.clone()))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
