//! In-memory `TaskStore`: task and worker maps behind one RwLock.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{StoreError, TaskError, WorkerError};
use crate::store::traits::{Settlement, TaskCounts, TaskStore, WorkerCounts};
use crate::task::{Task, TaskStatus};
use crate::worker::Worker;

#[derive(Default)]
struct State {
    tasks: HashMap<Uuid, Task>,
    workers: BTreeMap<String, Worker>,
}

/// Default store. Queries take the read lock; transitions take the write lock.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn task_not_found(id: Uuid) -> StoreError {
    TaskError::NotFound { id }.into()
}

fn worker_not_found(id: &str) -> StoreError {
    WorkerError::NotFound { id: id.to_string() }.into()
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn insert_task(&self, task: Task) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.tasks.contains_key(&task.id) {
            return Err(StoreError::DuplicateTask(task.id));
        }
        state.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Option<Task> {
        self.state.read().await.tasks.get(&id).cloned()
    }

    async fn remove_task(&self, id: Uuid) -> Option<Task> {
        self.state.write().await.tasks.remove(&id)
    }

    async fn list_tasks(&self) -> Vec<Task> {
        self.state.read().await.tasks.values().cloned().collect()
    }

    async fn insert_worker(&self, worker: Worker) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.workers.contains_key(&worker.id) {
            return Err(WorkerError::AlreadyExists { id: worker.id }.into());
        }
        state.workers.insert(worker.id.clone(), worker);
        Ok(())
    }

    async fn get_worker(&self, id: &str) -> Option<Worker> {
        self.state.read().await.workers.get(id).cloned()
    }

    async fn remove_worker(&self, id: &str) -> Option<Worker> {
        let mut state = self.state.write().await;
        match state.workers.get(id) {
            Some(worker) if worker.current_task.is_none() => state.workers.remove(id),
            _ => None,
        }
    }

    async fn list_workers(&self) -> Vec<Worker> {
        self.state.read().await.workers.values().cloned().collect()
    }

    async fn claim(&self, task_id: Uuid, worker_id: &str) -> Result<Task, StoreError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let worker = state
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| worker_not_found(worker_id))?;
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| task_not_found(task_id))?;

        // Validate both sides before mutating either
        if !worker.is_idle() {
            return Err(WorkerError::NotIdle {
                id: worker.id.clone(),
                status: worker.status.to_string(),
            }
            .into());
        }
        if task.status != TaskStatus::Pending {
            return Err(TaskError::InvalidTransition {
                id: task_id,
                status: task.status.to_string(),
                action: "claim".to_string(),
            }
            .into());
        }

        worker.assign(task_id)?;
        task.start(worker_id)?;
        Ok(task.clone())
    }

    async fn settle(
        &self,
        task_id: Uuid,
        worker_id: &str,
        outcome: Result<serde_json::Value, String>,
        elapsed: Duration,
    ) -> Result<Settlement, StoreError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let worker = state
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| worker_not_found(worker_id))?;
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| task_not_found(task_id))?;

        if worker.current_task != Some(task_id)
            || task.assigned_worker.as_deref() != Some(worker_id)
        {
            return Err(WorkerError::NotHolding {
                id: worker_id.to_string(),
                task_id,
            }
            .into());
        }

        let success = outcome.is_ok();
        let disposition = task.finish(outcome)?;
        worker.release(task_id, success, elapsed)?;

        Ok(Settlement {
            task: task.clone(),
            disposition,
        })
    }

    async fn stop_worker(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let worker = state.workers.get_mut(id).ok_or_else(|| worker_not_found(id))?;
        worker.stop()?;
        Ok(())
    }

    async fn heartbeat(&self, id: &str) {
        if let Some(worker) = self.state.write().await.workers.get_mut(id) {
            worker.heartbeat();
        }
    }

    async fn counts(&self) -> (TaskCounts, WorkerCounts) {
        let state = self.state.read().await;
        (
            TaskCounts::tally(state.tasks.values()),
            WorkerCounts::tally(state.workers.values()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Disposition, TaskSpec};
    use crate::worker::{WorkerSpec, WorkerStatus};

    async fn store_with(worker_ids: &[&str]) -> InMemoryStore {
        let store = InMemoryStore::new();
        for id in worker_ids {
            store
                .insert_worker(Worker::new(WorkerSpec::new(*id, ["general"])))
                .await
                .unwrap();
        }
        store
    }

    async fn pending_task(store: &InMemoryStore, max_attempts: u32) -> Uuid {
        let task = Task::from_spec(TaskSpec::new("analysis").with_max_attempts(max_attempts), 3);
        let id = task.id;
        store.insert_task(task).await.unwrap();
        id
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = store_with(&[]).await;
        let id = pending_task(&store, 3).await;

        let task = store.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(store.get_task(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_worker_rejected() {
        let store = store_with(&["w1"]).await;
        let result = store
            .insert_worker(Worker::new(WorkerSpec::new("w1", ["general"])))
            .await;
        assert!(matches!(
            result,
            Err(StoreError::Worker(WorkerError::AlreadyExists { .. }))
        ));
    }

    #[tokio::test]
    async fn busy_worker_is_not_removed() {
        let store = store_with(&["w1", "w2"]).await;
        let id = pending_task(&store, 3).await;
        store.claim(id, "w1").await.unwrap();

        assert!(store.remove_worker("w1").await.is_none());
        assert!(store.remove_worker("w2").await.is_some());
        assert!(store.remove_worker("w2").await.is_none());
        assert_eq!(store.list_workers().await.len(), 1);
    }

    #[tokio::test]
    async fn claim_flips_both_sides() {
        let store = store_with(&["w1"]).await;
        let id = pending_task(&store, 3).await;

        let task = store.claim(id, "w1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.assigned_worker.as_deref(), Some("w1"));

        let worker = store.get_worker("w1").await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Busy);
        assert_eq!(worker.current_task, Some(id));
    }

    #[tokio::test]
    async fn claim_busy_worker_changes_nothing() {
        let store = store_with(&["w1"]).await;
        let first = pending_task(&store, 3).await;
        let second = pending_task(&store, 3).await;

        store.claim(first, "w1").await.unwrap();
        let err = store.claim(second, "w1").await.unwrap_err();
        assert!(matches!(err, StoreError::Worker(WorkerError::NotIdle { .. })));

        let untouched = store.get_task(second).await.unwrap();
        assert_eq!(untouched.status, TaskStatus::Pending);
        assert!(untouched.assigned_worker.is_none());
    }

    #[tokio::test]
    async fn same_task_cannot_be_claimed_twice() {
        let store = store_with(&["w1", "w2"]).await;
        let id = pending_task(&store, 3).await;

        store.claim(id, "w1").await.unwrap();
        assert!(store.claim(id, "w2").await.is_err());
        assert!(store.get_worker("w2").await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn settle_success_frees_worker() {
        let store = store_with(&["w1"]).await;
        let id = pending_task(&store, 3).await;
        store.claim(id, "w1").await.unwrap();

        let settled = store
            .settle(id, "w1", Ok(serde_json::json!("done")), Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(settled.disposition, Disposition::Completed);

        let worker = store.get_worker("w1").await.unwrap();
        assert!(worker.is_idle());
        assert_eq!(worker.stats.completed, 1);
    }

    #[tokio::test]
    async fn settle_failure_counts_against_worker() {
        let store = store_with(&["w1"]).await;
        let id = pending_task(&store, 2).await;
        store.claim(id, "w1").await.unwrap();

        let settled = store
            .settle(id, "w1", Err("boom".into()), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(settled.disposition, Disposition::Retry);
        assert_eq!(settled.task.status, TaskStatus::Pending);

        let worker = store.get_worker("w1").await.unwrap();
        assert!(worker.is_idle());
        assert_eq!(worker.stats.failed, 1);
    }

    #[tokio::test]
    async fn settle_by_wrong_worker_is_rejected() {
        let store = store_with(&["w1", "w2"]).await;
        let id = pending_task(&store, 3).await;
        store.claim(id, "w1").await.unwrap();

        let err = store
            .settle(id, "w2", Ok(serde_json::Value::Null), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Worker(WorkerError::NotHolding { .. })));
        assert_eq!(store.get_task(id).await.unwrap().status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn counts_are_consistent() {
        let store = store_with(&["w1", "w2"]).await;
        let running = pending_task(&store, 3).await;
        pending_task(&store, 3).await;
        store.claim(running, "w1").await.unwrap();
        store.stop_worker("w2").await.unwrap();

        let (tasks, workers) = store.counts().await;
        assert_eq!(tasks.pending, 1);
        assert_eq!(tasks.running, 1);
        assert_eq!(tasks.total, 2);
        assert_eq!(workers.active, 1);
        assert_eq!(workers.stopped, 1);
        assert_eq!(workers.total, 2);
    }
}
