//! Worker state and rolling performance counters.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkerError;

/// Wildcard capability every worker carries.
pub const GENERAL_CAPABILITY: &str = "general";

/// Smoothing factor for the average task time.
const EMA_ALPHA: f64 = 0.1;

/// Status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Stopped,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Rolling performance counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
    /// Exponential moving average of attempt duration, in milliseconds.
    pub avg_task_ms: f64,
}

impl WorkerStats {
    /// Completed share of all attempts. A worker with no history has not
    /// proven anything yet and scores zero.
    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            0.0
        } else {
            self.completed as f64 / total as f64
        }
    }

    fn record(&mut self, success: bool, elapsed: Duration) {
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }

        let ms = elapsed.as_secs_f64() * 1000.0;
        if self.completed + self.failed == 1 {
            self.avg_task_ms = ms;
        } else {
            self.avg_task_ms = self.avg_task_ms * (1.0 - EMA_ALPHA) + ms * EMA_ALPHA;
        }
    }
}

/// Declaration of a worker to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub id: String,
    pub capabilities: Vec<String>,
}

impl WorkerSpec {
    pub fn new<I, S>(id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }
}

/// A logical executor with declared capabilities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Worker {
    pub id: String,
    pub capabilities: BTreeSet<String>,
    pub status: WorkerStatus,
    /// Task being executed; set iff status is busy.
    pub current_task: Option<Uuid>,
    pub stats: WorkerStats,
    pub last_heartbeat: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

impl Worker {
    /// Create an idle worker. The general capability is always added.
    pub fn new(spec: WorkerSpec) -> Self {
        let mut capabilities: BTreeSet<String> = spec
            .capabilities
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        capabilities.insert(GENERAL_CAPABILITY.to_string());

        let now = Utc::now();
        Self {
            id: spec.id,
            capabilities,
            status: WorkerStatus::Idle,
            current_task: None,
            stats: WorkerStats::default(),
            last_heartbeat: now,
            started_at: now,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == WorkerStatus::Idle
    }

    /// Whether this worker may execute a task of `task_type`.
    pub fn can_handle(&self, task_type: &str) -> bool {
        self.capabilities.contains(task_type) || self.capabilities.contains(GENERAL_CAPABILITY)
    }

    /// Whether `task_type` is one of the declared capabilities.
    pub fn has_exact(&self, task_type: &str) -> bool {
        self.capabilities.contains(task_type)
    }

    /// idle → busy holding `task_id`.
    pub fn assign(&mut self, task_id: Uuid) -> Result<(), WorkerError> {
        if self.status != WorkerStatus::Idle {
            return Err(WorkerError::NotIdle {
                id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        self.status = WorkerStatus::Busy;
        self.current_task = Some(task_id);
        self.heartbeat();
        Ok(())
    }

    /// busy → idle, recording the attempt.
    pub fn release(
        &mut self,
        task_id: Uuid,
        success: bool,
        elapsed: Duration,
    ) -> Result<(), WorkerError> {
        if self.current_task != Some(task_id) {
            return Err(WorkerError::NotHolding {
                id: self.id.clone(),
                task_id,
            });
        }
        self.stats.record(success, elapsed);
        self.status = WorkerStatus::Idle;
        self.current_task = None;
        self.heartbeat();
        Ok(())
    }

    /// idle → stopped. Busy workers must finish first.
    pub fn stop(&mut self) -> Result<(), WorkerError> {
        match self.status {
            WorkerStatus::Busy => Err(WorkerError::NotIdle {
                id: self.id.clone(),
                status: self.status.to_string(),
            }),
            _ => {
                self.status = WorkerStatus::Stopped;
                Ok(())
            }
        }
    }

    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(caps: &[&str]) -> Worker {
        Worker::new(WorkerSpec::new("w", caps.iter().copied()))
    }

    #[test]
    fn general_is_always_present() {
        let w = worker(&["generation"]);
        assert!(w.capabilities.contains("general"));
        assert!(w.can_handle("generation"));
        assert!(w.can_handle("anything"));
        assert!(w.has_exact("generation"));
        assert!(!w.has_exact("anything"));
    }

    #[test]
    fn assign_and_release() {
        let mut w = worker(&[]);
        let task_id = Uuid::new_v4();

        w.assign(task_id).unwrap();
        assert_eq!(w.status, WorkerStatus::Busy);
        assert_eq!(w.current_task, Some(task_id));
        assert!(w.assign(Uuid::new_v4()).is_err());

        w.release(task_id, true, Duration::from_millis(10)).unwrap();
        assert!(w.is_idle());
        assert!(w.current_task.is_none());
        assert_eq!(w.stats.completed, 1);
    }

    #[test]
    fn release_requires_holding() {
        let mut w = worker(&[]);
        let held = Uuid::new_v4();
        w.assign(held).unwrap();
        assert!(matches!(
            w.release(Uuid::new_v4(), true, Duration::ZERO),
            Err(WorkerError::NotHolding { .. })
        ));
    }

    #[test]
    fn success_rate_tracks_history() {
        let mut stats = WorkerStats::default();
        assert_eq!(stats.success_rate(), 0.0);

        stats.record(true, Duration::from_millis(100));
        stats.record(false, Duration::from_millis(200));
        assert_eq!(stats.success_rate(), 0.5);
        assert!((stats.avg_task_ms - 110.0).abs() < 1e-6);
    }

    #[test]
    fn busy_worker_cannot_stop() {
        let mut w = worker(&[]);
        w.assign(Uuid::new_v4()).unwrap();
        assert!(w.stop().is_err());
    }
}
