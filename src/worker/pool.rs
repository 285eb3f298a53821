//! Worker pool: worker registration, capability matching and executor handles.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, WorkerError};
use crate::task::Task;
use crate::worker::executor::{Executor, ExecutorDeps};
use crate::worker::state::{Worker, WorkerSpec};

/// Pick the best idle worker able to run `task_type`.
///
/// Ranking, best first: higher success rate, more completed tasks, an exact
/// capability match over the general fallback, a narrower capability set,
/// then the lower id.
pub fn find_best_worker<'a>(task_type: &str, workers: &'a [Worker]) -> Option<&'a Worker> {
    workers
        .iter()
        .filter(|w| w.is_idle() && w.can_handle(task_type))
        .max_by(|a, b| rank(task_type, a, b))
}

fn rank(task_type: &str, a: &Worker, b: &Worker) -> CmpOrdering {
    a.stats
        .success_rate()
        .total_cmp(&b.stats.success_rate())
        .then_with(|| a.stats.completed.cmp(&b.stats.completed))
        .then_with(|| a.has_exact(task_type).cmp(&b.has_exact(task_type)))
        .then_with(|| b.capabilities.len().cmp(&a.capabilities.len()))
        .then_with(|| b.id.cmp(&a.id))
}

/// Running executor loop for one worker.
struct WorkerHandle {
    mailbox: mpsc::Sender<Task>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Owns the executor loops. Worker state itself lives in the store.
pub struct WorkerPool {
    deps: ExecutorDeps,
    handles: RwLock<HashMap<String, WorkerHandle>>,
    next_id: AtomicUsize,
}

impl WorkerPool {
    pub fn new(deps: ExecutorDeps) -> Self {
        Self {
            deps,
            handles: RwLock::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Register a worker and start its executor loop.
    pub async fn spawn(&self, spec: WorkerSpec) -> Result<String, Error> {
        if self.deps.cancel.is_cancelled() {
            return Err(Error::Stopped);
        }

        let worker = Worker::new(spec);
        let id = worker.id.clone();
        let capabilities: Vec<&str> = worker.capabilities.iter().map(String::as_str).collect();
        tracing::info!(worker_id = %id, capabilities = ?capabilities, "Spawning worker");

        let mut handles = self.handles.write().await;
        if handles.contains_key(&id) {
            return Err(WorkerError::AlreadyExists { id }.into());
        }
        self.deps.store.insert_worker(worker).await?;

        let (mailbox, rx) = mpsc::channel(1);
        let cancel = self.deps.cancel.child_token();
        let executor = Executor::new(id.clone(), self.deps.clone());
        let join = tokio::spawn(executor.run(rx, cancel.clone()));

        handles.insert(
            id.clone(),
            WorkerHandle {
                mailbox,
                cancel,
                join,
            },
        );
        Ok(id)
    }

    /// Next unused generated worker id.
    pub fn next_name(&self) -> String {
        format!("worker_{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Stop an idle worker and end its loop. Busy workers are refused.
    pub async fn retire(&self, id: &str) -> Result<(), Error> {
        let mut handles = self.handles.write().await;
        if !handles.contains_key(id) {
            return Err(WorkerError::NotFound { id: id.to_string() }.into());
        }

        // The store refuses if a task was claimed in the meantime.
        self.deps.store.stop_worker(id).await?;

        if let Some(handle) = handles.remove(id) {
            handle.cancel.cancel();
        }
        tracing::info!(worker_id = %id, "Worker retired");
        Ok(())
    }

    /// Undo `spawn` for these workers: end their loops and drop them from the
    /// store.
    pub async fn discard(&self, ids: &[String]) {
        let mut handles = self.handles.write().await;
        for id in ids {
            if let Some(handle) = handles.remove(id) {
                handle.cancel.cancel();
            }
            if self.deps.store.remove_worker(id).await.is_none() {
                tracing::warn!(worker_id = %id, "Worker not discarded");
            }
        }
    }

    /// Best idle worker for `task_type` from a fresh snapshot.
    pub async fn select(&self, task_type: &str) -> Option<String> {
        let workers = self.deps.store.list_workers().await;
        find_best_worker(task_type, &workers).map(|w| w.id.clone())
    }

    /// Hand a claimed task to the worker's loop.
    pub async fn deliver(&self, worker_id: &str, task: Task) -> Result<(), Task> {
        let handles = self.handles.read().await;
        match handles.get(worker_id) {
            Some(handle) => handle.mailbox.try_send(task).map_err(|e| e.into_inner()),
            None => Err(task),
        }
    }

    /// Cancel every loop and hand back their join handles.
    pub async fn shutdown(&self) -> Vec<JoinHandle<()>> {
        let mut handles = self.handles.write().await;
        handles
            .drain()
            .map(|(_, handle)| {
                handle.cancel.cancel();
                handle.join
            })
            .collect()
    }

    /// Mark every idle worker stopped once the loops are gone.
    pub async fn mark_stopped(&self) {
        for worker in self.deps.store.list_workers().await {
            if let Err(e) = self.deps.store.stop_worker(&worker.id).await {
                tracing::debug!(worker_id = %worker.id, error = %e, "Worker left as is");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn worker(id: &str, caps: &[&str]) -> Worker {
        Worker::new(WorkerSpec::new(id, caps.iter().copied()))
    }

    #[test]
    fn exact_match_beats_general_fallback() {
        let workers = vec![worker("a", &["generation"]), worker("b", &["general"])];

        let best = find_best_worker("generation", &workers).unwrap();
        assert_eq!(best.id, "a");

        let best = find_best_worker("testing", &workers).unwrap();
        assert_eq!(best.id, "b");
    }

    #[test]
    fn success_rate_ranks_first() {
        let mut reliable = worker("z", &[]);
        reliable.assign(Uuid::new_v4()).unwrap();
        let held = reliable.current_task.unwrap();
        reliable.release(held, true, Duration::from_millis(1)).unwrap();

        let mut flaky = worker("a", &["analysis"]);
        for success in [true, false] {
            let id = Uuid::new_v4();
            flaky.assign(id).unwrap();
            flaky.release(id, success, Duration::from_millis(1)).unwrap();
        }

        let workers = vec![flaky, reliable];
        assert_eq!(find_best_worker("analysis", &workers).unwrap().id, "z");
    }

    #[test]
    fn completed_count_breaks_rate_tie() {
        let mut veteran = worker("b", &[]);
        for _ in 0..3 {
            let id = Uuid::new_v4();
            veteran.assign(id).unwrap();
            veteran.release(id, true, Duration::from_millis(1)).unwrap();
        }
        let fresh = worker("a", &[]);

        let workers = vec![fresh, veteran];
        assert_eq!(find_best_worker("analysis", &workers).unwrap().id, "b");
    }

    #[test]
    fn proven_worker_beats_untested_one() {
        let mut veteran = worker("veteran", &[]);
        for success in [true, true, true, false] {
            let id = Uuid::new_v4();
            veteran.assign(id).unwrap();
            veteran.release(id, success, Duration::from_millis(1)).unwrap();
        }
        let fresh = worker("fresh", &["analysis"]);

        let workers = vec![fresh, veteran];
        assert_eq!(find_best_worker("analysis", &workers).unwrap().id, "veteran");
    }

    #[test]
    fn lower_id_wins_full_tie() {
        // Both untested, so both score zero.
        let workers = vec![worker("worker_2", &[]), worker("worker_1", &[])];
        assert_eq!(workers[0].stats.success_rate(), 0.0);
        assert_eq!(find_best_worker("x", &workers).unwrap().id, "worker_1");
    }

    #[test]
    fn narrower_set_wins() {
        let workers = vec![
            worker("a", &["analysis", "generation"]),
            worker("b", &["analysis"]),
        ];
        assert_eq!(find_best_worker("analysis", &workers).unwrap().id, "b");
    }

    #[test]
    fn busy_and_stopped_workers_are_skipped() {
        let mut busy = worker("a", &[]);
        busy.assign(Uuid::new_v4()).unwrap();
        let mut stopped = worker("b", &[]);
        stopped.stop().unwrap();

        let workers = vec![busy, stopped];
        assert!(find_best_worker("analysis", &workers).is_none());
    }
}
