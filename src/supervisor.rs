//! Supervisor facade: lifecycle, submission and status queries.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::decompose::{Decomposer, DecompositionStrategy};
use crate::error::{Error, HandlerError, Result, TaskError};
use crate::handlers::{GeneralHandler, HandlerContext, HandlerRegistry, TaskHandler};
use crate::queue::TaskQueue;
use crate::results::{ResultSink, ResultStats};
use crate::store::{InMemoryStore, TaskCounts, TaskStore, WorkerCounts};
use crate::task::{Payload, Task, TaskResult, TaskSpec};
use crate::worker::{Dispatcher, ExecutorDeps, GENERAL_CAPABILITY, Worker, WorkerPool, WorkerSpec};

/// How often `wait_terminal` re-reads the task.
const WAIT_POLL: Duration = Duration::from_millis(10);

/// Snapshot of every worker plus counts over the same view.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatusReport {
    pub workers: Vec<Worker>,
    pub counts: WorkerCounts,
}

/// Aggregate scheduler status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub name: String,
    pub running: bool,
    pub tasks: TaskCounts,
    pub workers: WorkerCounts,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub results: ResultStats,
}

/// In-process task scheduler and worker-pool coordinator.
pub struct Supervisor {
    config: SupervisorConfig,
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    queue: Arc<TaskQueue>,
    results: Arc<ResultSink>,
    pool: Arc<WorkerPool>,
    deps: ExecutorDeps,
    decomposer: Decomposer,
    initial_workers: Vec<WorkerSpec>,
    cancel: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    /// Supervisor over the in-memory store.
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    /// Supervisor over a caller-supplied store.
    pub fn with_store(config: SupervisorConfig, store: Arc<dyn TaskStore>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(HandlerRegistry::new());
        registry.register_sync(GENERAL_CAPABILITY, Arc::new(GeneralHandler));

        let queue = Arc::new(TaskQueue::new(config.queue_capacity, config.enqueue_timeout));
        let results = Arc::new(ResultSink::new(config.result_capacity, config.enqueue_timeout));
        let cancel = CancellationToken::new();

        let deps = ExecutorDeps {
            store: store.clone(),
            registry: registry.clone(),
            queue: queue.clone(),
            results: results.clone(),
            worker_freed: Arc::new(Notify::new()),
            poll_interval: config.poll_interval,
            retry_backoff: config.retry_backoff,
            task_timeout: config.task_timeout,
            cancel: cancel.clone(),
        };
        let pool = Arc::new(WorkerPool::new(deps.clone()));

        Ok(Self {
            config,
            store,
            registry,
            queue,
            results,
            pool,
            deps,
            decomposer: Decomposer::default(),
            initial_workers: Vec::new(),
            cancel,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            loops: Mutex::new(Vec::new()),
        })
    }

    /// Start with these workers instead of `worker_count` uniform ones.
    pub fn with_workers(mut self, workers: Vec<WorkerSpec>) -> Self {
        self.initial_workers = workers;
        self
    }

    /// Replace the keyword decomposition strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn DecompositionStrategy>) -> Self {
        self.decomposer = Decomposer::new(strategy);
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Create the workers and start the dispatcher, executor loops and result
    /// consumer. Calling it again is a no-op; after `stop()` it fails.
    ///
    /// If a worker cannot be created, the workers created so far are
    /// discarded and the supervisor stays not running.
    pub async fn start(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::info!(name = %self.config.name, "Starting supervisor");

        let mut loops = self.loops.lock().await;
        if let Some(handle) = self.results.spawn(self.cancel.clone()).await {
            loops.push(handle);
        }

        let specs: Vec<WorkerSpec> = if self.initial_workers.is_empty() {
            (0..self.config.worker_count)
                .map(|_| {
                    WorkerSpec::new(self.pool.next_name(), self.config.worker_capabilities.clone())
                })
                .collect()
        } else {
            self.initial_workers.clone()
        };

        let mut worker_ids = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.pool.spawn(spec).await {
                Ok(id) => worker_ids.push(id),
                Err(e) => {
                    tracing::error!(
                        name = %self.config.name,
                        error = %e,
                        "Supervisor failed to start"
                    );
                    self.pool.discard(&worker_ids).await;
                    self.started.store(false, Ordering::Release);
                    return Err(e);
                }
            }
        }

        let dispatcher = Dispatcher::new(
            self.deps.clone(),
            self.pool.clone(),
            self.config.requeue_delay,
            self.config.starvation_warn_after,
        );
        loops.push(tokio::spawn(dispatcher.run(self.cancel.clone())));

        tracing::info!(
            name = %self.config.name,
            workers = worker_ids.len(),
            queue_capacity = self.queue.capacity(),
            "Supervisor started"
        );
        Ok(())
    }

    /// Signal every loop to stop, wait up to the grace period, then release
    /// the queue and result sink. Only the first call does anything.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(name = %self.config.name, "Stopping supervisor");
        self.cancel.cancel();

        let mut handles: Vec<JoinHandle<()>> = self.loops.lock().await.drain(..).collect();
        handles.extend(self.pool.shutdown().await);

        let grace = self.config.shutdown_grace;
        if tokio::time::timeout(grace, join_all(handles)).await.is_err() {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "Some loops did not stop within the grace period"
            );
        }

        self.queue.close();
        self.results.close();
        self.pool.mark_stopped().await;

        tracing::info!(name = %self.config.name, "Supervisor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire)
    }

    /// Validate and enqueue one task.
    ///
    /// Waits up to the enqueue timeout when the queue is full; a task that
    /// still does not fit is removed again and the capacity error returned.
    pub async fn submit(&self, spec: TaskSpec) -> Result<Uuid> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }
        spec.validate()?;

        let task = Task::from_spec(spec, self.config.default_max_attempts);
        let id = task.id;
        let task_type = task.task_type.clone();
        let priority = task.priority;
        self.store.insert_task(task).await?;

        if let Err(e) = self.queue.enqueue(id).await {
            self.store.remove_task(id).await;
            tracing::warn!(task_id = %id, task_type = %task_type, error = %e, "Task rejected");
            return Err(e.into());
        }

        tracing::debug!(task_id = %id, task_type = %task_type, priority, "Submitted task");
        Ok(id)
    }

    /// Submit several tasks in order.
    ///
    /// Every spec is validated before anything is enqueued. A capacity error
    /// part-way leaves the earlier tasks submitted.
    pub async fn submit_batch(&self, specs: Vec<TaskSpec>) -> Result<Vec<Uuid>> {
        for spec in &specs {
            spec.validate()?;
        }

        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            ids.push(self.submit(spec).await?);
        }
        Ok(ids)
    }

    /// Split a request into task specs without submitting them.
    pub async fn decompose(&self, description: &str, context: &Payload) -> Vec<TaskSpec> {
        self.decomposer.decompose(description, context).await
    }

    /// Decompose a request and submit the resulting tasks.
    pub async fn submit_request(&self, description: &str, context: &Payload) -> Result<Vec<Uuid>> {
        let specs = self.decompose(description, context).await;
        self.submit_batch(specs).await
    }

    /// Snapshot of a task.
    pub async fn get_task(&self, id: Uuid) -> Result<Task> {
        self.store
            .get_task(id)
            .await
            .ok_or_else(|| TaskError::NotFound { id }.into())
    }

    /// Every task, oldest first.
    pub async fn list_tasks(&self) -> Vec<Task> {
        let mut tasks = self.store.list_tasks().await;
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Remove a finished task from the store.
    pub async fn retire_task(&self, id: Uuid) -> Result<Task> {
        let task = self.get_task(id).await?;
        if !task.status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                id,
                status: task.status.to_string(),
                action: "retire".to_string(),
            }
            .into());
        }
        self.store
            .remove_task(id)
            .await
            .ok_or_else(|| TaskError::NotFound { id }.into())
    }

    /// Poll until the task is terminal or `timeout` elapses, returning the
    /// latest snapshot either way.
    pub async fn wait_terminal(&self, id: Uuid, timeout: Duration) -> Result<Task> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.get_task(id).await?;
            if task.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(task);
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    pub async fn worker_status(&self) -> WorkerStatusReport {
        let workers = self.store.list_workers().await;
        let counts = WorkerCounts::tally(&workers);
        WorkerStatusReport { workers, counts }
    }

    pub async fn system_status(&self) -> SystemStatus {
        let (tasks, workers) = self.store.counts().await;
        SystemStatus {
            name: self.config.name.clone(),
            running: self.is_running(),
            tasks,
            workers,
            queue_depth: self.queue.depth(),
            queue_capacity: self.queue.capacity(),
            results: self.results.stats().await,
        }
    }

    /// Receive every terminal result published from now on.
    pub fn subscribe_results(&self) -> broadcast::Receiver<TaskResult> {
        self.results.subscribe()
    }

    pub async fn register_handler(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.registry.register(task_type, handler).await;
    }

    pub async fn register_fn<F, Fut>(&self, task_type: impl Into<String>, f: F)
    where
        F: Fn(HandlerContext, Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<serde_json::Value, HandlerError>> + Send + 'static,
    {
        self.registry.register_fn(task_type, f).await;
    }

    /// Add a worker to the pool. An empty id gets a generated one.
    pub async fn spawn_worker(&self, mut spec: WorkerSpec) -> Result<String> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }
        if spec.id.trim().is_empty() {
            spec.id = self.pool.next_name();
        }
        self.pool.spawn(spec).await
    }

    /// Stop an idle worker and remove it from dispatch.
    pub async fn retire_worker(&self, id: &str) -> Result<()> {
        self.pool.retire(id).await
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
