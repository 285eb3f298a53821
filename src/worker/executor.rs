//! Per-worker executor loop.
//!
//! Each worker runs one loop that receives claimed tasks through a mailbox
//! and executes them strictly one at a time. Handler failures, timeouts and
//! panics all end up as a failed attempt on the task.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::HandlerError;
use crate::handlers::{HandlerContext, HandlerRegistry};
use crate::queue::TaskQueue;
use crate::results::ResultSink;
use crate::store::{Settlement, TaskStore};
use crate::task::{Disposition, Task, TaskResult};

/// Shared dependencies for executor loops.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub store: Arc<dyn TaskStore>,
    pub registry: Arc<HandlerRegistry>,
    pub queue: Arc<TaskQueue>,
    pub results: Arc<ResultSink>,
    /// Signalled whenever a worker goes back to idle.
    pub worker_freed: Arc<Notify>,
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub task_timeout: Option<Duration>,
    /// Supervisor-wide stop signal.
    pub cancel: CancellationToken,
}

impl ExecutorDeps {
    /// Apply a handler outcome and route the task onward: back into the
    /// queue for a retry, or out to the result sink when terminal.
    pub async fn settle(
        &self,
        task_id: Uuid,
        worker_id: &str,
        outcome: Result<serde_json::Value, String>,
        elapsed: Duration,
    ) {
        let settlement = self
            .store
            .settle(task_id, worker_id, outcome, elapsed)
            .await;
        self.worker_freed.notify_one();

        let Settlement { task, disposition } = match settlement {
            Ok(settlement) => settlement,
            Err(e) => {
                tracing::error!(
                    task_id = %task_id,
                    worker_id = %worker_id,
                    error = %e,
                    "Failed to settle task"
                );
                return;
            }
        };

        match disposition {
            Disposition::Retry => {
                let delay = self.retry_delay();
                tracing::info!(
                    task_id = %task.id,
                    worker_id = %worker_id,
                    attempt = task.attempt_count,
                    max_attempts = task.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = task.error.as_deref().unwrap_or(""),
                    "Attempt failed, re-queueing"
                );
                self.queue.requeue_after(task.id, delay, self.cancel.clone());
            }
            Disposition::Completed | Disposition::Failed => {
                self.results
                    .publish(TaskResult::from_task(&task, worker_id, elapsed))
                    .await;
            }
        }
    }

    /// Backoff plus up to 25% jitter.
    fn retry_delay(&self) -> Duration {
        if self.retry_backoff.is_zero() {
            return Duration::ZERO;
        }
        let base = self.retry_backoff.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=base / 4);
        Duration::from_millis(base + jitter)
    }
}

/// Executes claimed tasks for a single worker.
pub struct Executor {
    worker_id: String,
    deps: ExecutorDeps,
}

impl Executor {
    pub fn new(worker_id: String, deps: ExecutorDeps) -> Self {
        Self { worker_id, deps }
    }

    /// Run until `cancel` fires or the mailbox closes.
    pub async fn run(self, mut mailbox: mpsc::Receiver<Task>, cancel: CancellationToken) {
        tracing::debug!(worker_id = %self.worker_id, "Executor loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = tokio::time::timeout(self.deps.poll_interval, mailbox.recv()) => {
                    match received {
                        Ok(Some(task)) => self.execute(task, &cancel).await,
                        Ok(None) => break,
                        Err(_) => self.deps.store.heartbeat(&self.worker_id).await,
                    }
                }
            }
        }

        tracing::debug!(worker_id = %self.worker_id, "Executor loop stopped");
    }

    async fn execute(&self, task: Task, cancel: &CancellationToken) {
        let task_id = task.id;
        let attempt = task.attempt_count + 1;
        let started = Instant::now();

        tracing::debug!(
            task_id = %task_id,
            task_type = %task.task_type,
            worker_id = %self.worker_id,
            attempt,
            "Executing task"
        );

        let ctx = HandlerContext {
            task_id,
            worker_id: self.worker_id.clone(),
            attempt,
            cancel: cancel.child_token(),
        };

        let outcome = self.invoke(ctx, task).await.map_err(|e| {
            if matches!(e, HandlerError::Panicked(_)) {
                tracing::error!(
                    task_id = %task_id,
                    worker_id = %self.worker_id,
                    error = %e,
                    "Handler panicked"
                );
            }
            e.to_string()
        });

        self.deps
            .settle(task_id, &self.worker_id, outcome, started.elapsed())
            .await;
    }

    /// Run the handler in its own tokio task so a panic or a timeout stays
    /// contained to this attempt.
    async fn invoke(
        &self,
        ctx: HandlerContext,
        task: Task,
    ) -> Result<serde_json::Value, HandlerError> {
        let Some((matched, handler)) = self.deps.registry.resolve(&task.task_type).await else {
            return Err(HandlerError::failed(format!(
                "no handler registered for task type '{}'",
                task.task_type
            )));
        };
        if matched != task.task_type {
            tracing::debug!(
                task_id = %task.id,
                task_type = %task.task_type,
                "Falling back to general handler"
            );
        }

        let token = ctx.cancel.clone();
        let mut join = tokio::spawn(async move { handler.handle(ctx, task).await });

        let joined = match self.deps.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut join).await {
                Ok(joined) => joined,
                Err(_) => {
                    token.cancel();
                    join.abort();
                    return Err(HandlerError::Timeout(limit));
                }
            },
            None => join.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(HandlerError::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(HandlerError::Cancelled),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::GeneralHandler;
    use crate::store::InMemoryStore;
    use crate::task::{TaskSpec, TaskStatus};
    use crate::worker::{Worker, WorkerSpec, WorkerStatus};

    struct PanickingHandler;

    #[async_trait::async_trait]
    impl crate::handlers::TaskHandler for PanickingHandler {
        async fn handle(
            &self,
            _ctx: HandlerContext,
            _task: Task,
        ) -> Result<serde_json::Value, HandlerError> {
            panic!("handler blew up")
        }
    }

    struct Harness {
        deps: ExecutorDeps,
        mailbox: mpsc::Sender<Task>,
        cancel: CancellationToken,
        results: tokio::sync::broadcast::Receiver<TaskResult>,
    }

    async fn harness(task_timeout: Option<Duration>) -> Harness {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryStore::new());
        store
            .insert_worker(Worker::new(WorkerSpec::new("worker_1", ["analysis"])))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let results = Arc::new(ResultSink::new(16, Duration::from_millis(50)));
        let subscription = results.subscribe();
        results.spawn(cancel.clone()).await.unwrap();

        let deps = ExecutorDeps {
            store,
            registry: Arc::new(HandlerRegistry::new()),
            queue: Arc::new(TaskQueue::new(16, Duration::from_millis(50))),
            results,
            worker_freed: Arc::new(Notify::new()),
            poll_interval: Duration::from_millis(10),
            retry_backoff: Duration::ZERO,
            task_timeout,
            cancel: cancel.clone(),
        };

        let (mailbox, rx) = mpsc::channel(1);
        let executor = Executor::new("worker_1".to_string(), deps.clone());
        tokio::spawn(executor.run(rx, cancel.child_token()));

        Harness {
            deps,
            mailbox,
            cancel,
            results: subscription,
        }
    }

    async fn claim_and_send(h: &Harness, spec: TaskSpec) -> Uuid {
        let task = Task::from_spec(spec, 3);
        let id = task.id;
        h.deps.store.insert_task(task).await.unwrap();
        let claimed = h.deps.store.claim(id, "worker_1").await.unwrap();
        h.mailbox.send(claimed).await.unwrap();
        id
    }

    #[tokio::test]
    async fn success_publishes_result_and_frees_worker() {
        let mut h = harness(None).await;
        h.deps
            .registry
            .register_fn("analysis", |_ctx, _task| async {
                Ok::<_, HandlerError>(serde_json::json!(42))
            })
            .await;

        let id = claim_and_send(&h, TaskSpec::new("analysis")).await;
        let result = h.results.recv().await.unwrap();
        assert_eq!(result.task_id, id);
        assert!(result.success);
        assert_eq!(result.output, Some(serde_json::json!(42)));

        let task = h.deps.store.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let worker = h.deps.store.get_worker("worker_1").await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Idle);
        assert_eq!(worker.stats.completed, 1);

        h.cancel.cancel();
    }

    #[tokio::test]
    async fn failure_with_attempts_left_is_requeued() {
        let mut h = harness(None).await;
        h.deps
            .registry
            .register_fn("analysis", |_ctx, _task| async {
                Err::<serde_json::Value, _>(HandlerError::failed("nope"))
            })
            .await;

        let id = claim_and_send(&h, TaskSpec::new("analysis").with_max_attempts(2)).await;
        assert_eq!(h.deps.queue.dequeue().await, Some(id));

        let task = h.deps.store.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt_count, 1);
        assert_eq!(task.error.as_deref(), Some("nope"));
        assert!(h.results.try_recv().is_err());

        h.cancel.cancel();
    }

    #[tokio::test]
    async fn panic_is_a_failed_attempt() {
        let mut h = harness(None).await;
        h.deps
            .registry
            .register("analysis", Arc::new(PanickingHandler))
            .await;

        let id = claim_and_send(&h, TaskSpec::new("analysis").with_max_attempts(1)).await;
        let result = h.results.recv().await.unwrap();
        assert_eq!(result.task_id, id);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("handler blew up"));

        let worker = h.deps.store.get_worker("worker_1").await.unwrap();
        assert!(worker.is_idle());
        assert_eq!(worker.stats.failed, 1);

        h.cancel.cancel();
    }

    #[tokio::test]
    async fn timeout_cancels_handler() {
        let mut h = harness(Some(Duration::from_millis(30))).await;
        h.deps
            .registry
            .register_fn("analysis", |_ctx, _task| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, HandlerError>(serde_json::Value::Null)
            })
            .await;

        let id = claim_and_send(&h, TaskSpec::new("analysis").with_max_attempts(1)).await;
        let result = h.results.recv().await.unwrap();
        assert_eq!(result.task_id, id);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));

        let worker = h.deps.store.get_worker("worker_1").await.unwrap();
        assert!(worker.is_idle());

        h.cancel.cancel();
    }

    #[tokio::test]
    async fn unmatched_type_uses_general_handler() {
        let mut h = harness(None).await;
        h.deps.registry.register("general", Arc::new(GeneralHandler)).await;

        let id = claim_and_send(&h, TaskSpec::new("unregistered")).await;
        let result = h.results.recv().await.unwrap();
        assert_eq!(result.task_id, id);
        assert!(result.success);
        assert_eq!(result.output.unwrap()["handled_by"], "general");

        h.cancel.cancel();
    }

    #[tokio::test]
    async fn missing_handler_fails_attempt() {
        let mut h = harness(None).await;

        let id = claim_and_send(&h, TaskSpec::new("orphan").with_max_attempts(1)).await;
        let result = h.results.recv().await.unwrap();
        assert_eq!(result.task_id, id);
        assert!(result.error.unwrap().contains("no handler"));

        h.cancel.cancel();
    }
}
