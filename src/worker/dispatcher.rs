//! Dispatcher: matches queued tasks to idle capable workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{QueueError, StoreError, WorkerError};
use crate::task::TaskStatus;
use crate::worker::executor::ExecutorDeps;
use crate::worker::pool::WorkerPool;

/// Outcome of one placement attempt.
enum Placement {
    Delivered,
    /// No idle capable worker right now.
    NoWorker,
    /// The task is gone or no longer pending.
    Skipped,
}

/// Single consumer of the task queue.
pub struct Dispatcher {
    deps: ExecutorDeps,
    pool: Arc<WorkerPool>,
    requeue_delay: Duration,
    starvation_warn_after: u32,
    /// Consecutive misses per task, for starvation warnings.
    misses: HashMap<Uuid, u32>,
    /// A task that could not be re-queued because the queue was full.
    carried: Option<Uuid>,
}

impl Dispatcher {
    pub fn new(
        deps: ExecutorDeps,
        pool: Arc<WorkerPool>,
        requeue_delay: Duration,
        starvation_warn_after: u32,
    ) -> Self {
        Self {
            deps,
            pool,
            requeue_delay,
            starvation_warn_after,
            misses: HashMap::new(),
            carried: None,
        }
    }

    /// Run until `cancel` fires or the queue closes.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::debug!("Dispatcher started");

        loop {
            let next = match self.carried.take() {
                Some(id) => Some(id),
                None => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        id = self.deps.queue.dequeue() => id,
                    }
                }
            };
            let Some(task_id) = next else { break };

            match self.place(task_id).await {
                Placement::Delivered | Placement::Skipped => {
                    self.misses.remove(&task_id);
                }
                Placement::NoWorker => {
                    self.note_miss(task_id).await;

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = self.deps.worker_freed.notified() => {}
                        _ = tokio::time::sleep(self.requeue_delay) => {}
                    }

                    match self.deps.queue.try_enqueue(task_id) {
                        Ok(()) => {}
                        Err(QueueError::Full { .. }) => self.carried = Some(task_id),
                        Err(QueueError::Closed) => break,
                    }
                }
            }
        }

        tracing::debug!("Dispatcher stopped");
    }

    async fn place(&self, task_id: Uuid) -> Placement {
        let Some(task) = self.deps.store.get_task(task_id).await else {
            tracing::debug!(task_id = %task_id, "Queued task no longer exists");
            return Placement::Skipped;
        };
        if task.status != TaskStatus::Pending {
            tracing::debug!(task_id = %task_id, status = %task.status, "Queued task not pending");
            return Placement::Skipped;
        }

        // The snapshot can go stale between selection and claim; a worker
        // that got busy in between is simply skipped on the next pass.
        loop {
            let Some(worker_id) = self.pool.select(&task.task_type).await else {
                return Placement::NoWorker;
            };

            let claimed = match self.deps.store.claim(task_id, &worker_id).await {
                Ok(claimed) => claimed,
                Err(StoreError::Worker(WorkerError::NotIdle { .. })) => continue,
                Err(e) => {
                    tracing::debug!(task_id = %task_id, error = %e, "Claim refused");
                    return Placement::Skipped;
                }
            };

            tracing::debug!(
                task_id = %task_id,
                task_type = %claimed.task_type,
                worker_id = %worker_id,
                attempt = claimed.attempt_count + 1,
                "Dispatched task"
            );

            if let Err(task) = self.pool.deliver(&worker_id, claimed).await {
                tracing::warn!(
                    task_id = %task.id,
                    worker_id = %worker_id,
                    "Worker loop unavailable, releasing claim"
                );
                self.deps
                    .settle(
                        task.id,
                        &worker_id,
                        Err(format!("worker {worker_id} unavailable")),
                        Duration::ZERO,
                    )
                    .await;
            }
            return Placement::Delivered;
        }
    }

    async fn note_miss(&mut self, task_id: Uuid) {
        let misses = self.misses.entry(task_id).or_insert(0);
        *misses += 1;

        if self.starvation_warn_after > 0 && *misses % self.starvation_warn_after == 0 {
            let task_type = self
                .deps
                .store
                .get_task(task_id)
                .await
                .map(|t| t.task_type)
                .unwrap_or_default();
            tracing::warn!(
                task_id = %task_id,
                task_type = %task_type,
                misses = *misses,
                "No capable idle worker for task"
            );
        }
    }
}
