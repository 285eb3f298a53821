//! `TaskStore` trait: single async interface over task and worker state.
//!
//! Every state transition that touches both a task and a worker goes through
//! one call (`claim`, `settle`) so implementations can apply it atomically.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::task::{Disposition, Task, TaskStatus};
use crate::worker::{Worker, WorkerStatus};

/// Task state after a handler outcome was applied.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub task: Task,
    pub disposition: Disposition,
}

/// Task counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl TaskCounts {
    pub fn tally<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
            counts.total += 1;
        }
        counts
    }
}

/// Worker counts by status. `active` is the busy count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerCounts {
    pub active: usize,
    pub idle: usize,
    pub stopped: usize,
    pub total: usize,
}

impl WorkerCounts {
    pub fn tally<'a>(workers: impl IntoIterator<Item = &'a Worker>) -> Self {
        let mut counts = Self::default();
        for worker in workers {
            match worker.status {
                WorkerStatus::Busy => counts.active += 1,
                WorkerStatus::Idle => counts.idle += 1,
                WorkerStatus::Stopped => counts.stopped += 1,
            }
            counts.total += 1;
        }
        counts
    }
}

/// Backend-agnostic store for tasks and workers.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Ids must be unique.
    async fn insert_task(&self, task: Task) -> Result<(), StoreError>;

    /// Deep-copied snapshot of a task.
    async fn get_task(&self, id: Uuid) -> Option<Task>;

    /// Remove a task regardless of status.
    async fn remove_task(&self, id: Uuid) -> Option<Task>;

    /// Snapshot of every task.
    async fn list_tasks(&self) -> Vec<Task>;

    /// Register a new worker. Ids must be unique.
    async fn insert_worker(&self, worker: Worker) -> Result<(), StoreError>;

    async fn get_worker(&self, id: &str) -> Option<Worker>;

    /// Remove a worker that holds no task. Busy workers stay put.
    async fn remove_worker(&self, id: &str) -> Option<Worker>;

    /// Snapshot of every worker, ordered by id.
    async fn list_workers(&self) -> Vec<Worker>;

    /// Atomically hand a pending task to an idle worker.
    ///
    /// Fails without changing anything if the worker is no longer idle or
    /// the task is no longer pending.
    async fn claim(&self, task_id: Uuid, worker_id: &str) -> Result<Task, StoreError>;

    /// Atomically apply a handler outcome to a running task and free the
    /// worker holding it.
    async fn settle(
        &self,
        task_id: Uuid,
        worker_id: &str,
        outcome: Result<serde_json::Value, String>,
        elapsed: Duration,
    ) -> Result<Settlement, StoreError>;

    /// Mark an idle worker stopped.
    async fn stop_worker(&self, id: &str) -> Result<(), StoreError>;

    /// Refresh a worker's heartbeat. Unknown ids are ignored.
    async fn heartbeat(&self, id: &str);

    /// Task and worker counts from one consistent view.
    async fn counts(&self) -> (TaskCounts, WorkerCounts);
}
