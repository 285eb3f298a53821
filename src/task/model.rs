//! Task, submission spec and terminal result types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;
use crate::task::state::{Disposition, TaskStatus};

/// Open key-value payload. Only handlers interpret it.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// What a caller submits. The id is assigned at submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Key into the handler registry.
    pub task_type: String,
    /// Advisory only; dispatch is FIFO.
    pub priority: i32,
    pub payload: Payload,
    /// Falls back to the supervisor default when unset.
    pub max_attempts: Option<u32>,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Set a single payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Check the spec can become a schedulable task.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.task_type.trim().is_empty() {
            return Err(TaskError::Invalid {
                reason: "task type must not be empty".to_string(),
            });
        }
        if self.max_attempts == Some(0) {
            return Err(TaskError::Invalid {
                reason: "max_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// A tracked unit of submitted work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    pub priority: i32,
    pub payload: Payload,
    pub status: TaskStatus,
    /// Handler output, present once completed.
    pub result: Option<serde_json::Value>,
    /// Last handler error, present after a failed attempt.
    pub error: Option<String>,
    pub max_attempts: u32,
    /// Failed attempts so far.
    pub attempt_count: u32,
    /// Worker holding (or last holding) the task.
    pub assigned_worker: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Start of the most recent attempt.
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Materialize a spec into a pending task with a fresh id.
    pub fn from_spec(spec: TaskSpec, default_max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: spec.task_type,
            priority: spec.priority,
            payload: spec.payload,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            max_attempts: spec.max_attempts.unwrap_or(default_max_attempts).max(1),
            attempt_count: 0,
            assigned_worker: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Payload `description` field, if it is a string.
    pub fn description(&self) -> Option<&str> {
        self.payload.get("description").and_then(|v| v.as_str())
    }

    /// PENDING → RUNNING on `worker_id`.
    pub fn start(&mut self, worker_id: &str) -> Result<(), TaskError> {
        self.check_transition(TaskStatus::Running, "start")?;
        self.status = TaskStatus::Running;
        self.assigned_worker = Some(worker_id.to_string());
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Apply the outcome of one handler invocation.
    ///
    /// Only a failure consumes an attempt. A failure with attempts left goes
    /// back to PENDING; otherwise the task becomes terminal.
    pub fn finish(
        &mut self,
        outcome: std::result::Result<serde_json::Value, String>,
    ) -> Result<Disposition, TaskError> {
        if self.status != TaskStatus::Running {
            return Err(self.transition_error("finish"));
        }

        match outcome {
            Ok(value) => {
                self.status = TaskStatus::Completed;
                self.result = Some(value);
                self.error = None;
                self.completed_at = Some(Utc::now());
                Ok(Disposition::Completed)
            }
            Err(message) => {
                self.attempt_count += 1;
                self.error = Some(message);
                if self.attempt_count < self.max_attempts {
                    self.status = TaskStatus::Pending;
                    self.assigned_worker = None;
                    Ok(Disposition::Retry)
                } else {
                    self.status = TaskStatus::Failed;
                    self.completed_at = Some(Utc::now());
                    Ok(Disposition::Failed)
                }
            }
        }
    }

    /// Attempts left before the task fails terminally.
    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }

    fn check_transition(&self, target: TaskStatus, action: &str) -> Result<(), TaskError> {
        if self.status.can_transition_to(target) {
            Ok(())
        } else {
            Err(self.transition_error(action))
        }
    }

    fn transition_error(&self, action: &str) -> TaskError {
        TaskError::InvalidTransition {
            id: self.id,
            status: self.status.to_string(),
            action: action.to_string(),
        }
    }
}

/// Terminal outcome of a task, produced exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub task_type: String,
    pub worker_id: String,
    pub success: bool,
    /// Failed attempts consumed. Equals `max_attempts` on terminal failure.
    pub attempts: u32,
    /// Wall time of the final attempt.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Handler output on success.
    pub output: Option<serde_json::Value>,
    /// Last error on failure.
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    /// Build the result for a task that just reached a terminal state.
    pub fn from_task(task: &Task, worker_id: &str, duration: Duration) -> Self {
        let success = task.status == TaskStatus::Completed;
        Self {
            task_id: task.id,
            task_type: task.task_type.clone(),
            worker_id: worker_id.to_string(),
            success,
            attempts: task.attempt_count,
            duration,
            output: if success { task.result.clone() } else { None },
            error: if success { None } else { task.error.clone() },
            completed_at: task.completed_at.unwrap_or_else(Utc::now),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
