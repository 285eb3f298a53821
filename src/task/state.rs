//! Task state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue (fresh or awaiting retry).
    Pending,
    /// Held by exactly one worker.
    Running,
    /// Handler returned successfully.
    Completed,
    /// Attempts exhausted.
    Failed,
}

impl TaskStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Running) |
            (Running, Completed) | (Running, Failed) |
            // Retry after a failed attempt
            (Running, Pending)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// What happened to a task once its handler returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Terminal success.
    Completed,
    /// Failed attempt, back to pending for another try.
    Retry,
    /// Terminal failure.
    Failed,
}

impl Disposition {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Retry)
    }
}
