//! Error types for the task supervisor.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Supervisor has been stopped")]
    Stopped,
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse {key}: {value:?}")]
    ParseError { key: String, value: String },
}

/// Backpressure and queue lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue stayed full for the whole bounded wait.
    #[error("Task queue is full (capacity {capacity}, waited {waited:?})")]
    Full { capacity: usize, waited: Duration },

    #[error("Task queue is closed")]
    Closed,
}

/// Task lookup and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Invalid task: {reason}")]
    Invalid { reason: String },

    #[error("Task {id} is {status}, cannot {action}")]
    InvalidTransition {
        id: Uuid,
        status: String,
        action: String,
    },
}

/// Worker pool errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker {id} not found")]
    NotFound { id: String },

    #[error("Worker {id} already exists")]
    AlreadyExists { id: String },

    #[error("Worker {id} is {status}, expected idle")]
    NotIdle { id: String, status: String },

    #[error("Worker {id} is not holding task {task_id}")]
    NotHolding { id: String, task_id: Uuid },
}

/// Store backend errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate task id {0}")]
    DuplicateTask(Uuid),

    #[error("Store backend failure: {0}")]
    Backend(String),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Error returned by a task handler. Recorded on the task as text; it never
/// propagates past the executor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("Handler cancelled")]
    Cancelled,
}

impl HandlerError {
    /// Shorthand for a plain failure message.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

/// Result type alias for the supervisor.
pub type Result<T> = std::result::Result<T, Error>;
