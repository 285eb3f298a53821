//! Result sink: terminal task outcomes are published here exactly once.
//!
//! Executors push into a bounded channel; a single consumer loop logs each
//! result, keeps running totals and fans the result out to subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::task::TaskResult;

/// Running totals over every result consumed so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultStats {
    pub delivered: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total_duration_ms: u64,
}

impl ResultStats {
    fn record(&mut self, result: &TaskResult) {
        self.delivered += 1;
        if result.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.total_duration_ms += result.duration.as_millis() as u64;
    }
}

/// Bounded outlet for terminal results.
pub struct ResultSink {
    tx: mpsc::Sender<TaskResult>,
    rx: Mutex<Option<mpsc::Receiver<TaskResult>>>,
    broadcast_tx: broadcast::Sender<TaskResult>,
    stats: RwLock<ResultStats>,
    publish_timeout: Duration,
    closed: AtomicBool,
}

impl ResultSink {
    pub fn new(capacity: usize, publish_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let (broadcast_tx, _) = broadcast::channel(capacity.max(16));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            broadcast_tx,
            stats: RwLock::new(ResultStats::default()),
            publish_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Hand a terminal result to the consumer loop.
    ///
    /// Waits up to the publish timeout while the sink is full; a result that
    /// still does not fit is logged and dropped. The task itself already
    /// carries its final state, so nothing is lost from the store.
    pub async fn publish(&self, result: TaskResult) {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!(task_id = %result.task_id, "Result sink closed, dropping result");
            return;
        }

        let task_id = result.task_id;
        match self.tx.send_timeout(result, self.publish_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(
                    task_id = %task_id,
                    capacity = self.tx.max_capacity(),
                    "Result sink full, dropping result"
                );
            }
            Err(SendTimeoutError::Closed(_)) => {
                tracing::warn!(task_id = %task_id, "Result sink closed, dropping result");
            }
        }
    }

    /// Receive every result consumed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskResult> {
        self.broadcast_tx.subscribe()
    }

    pub async fn stats(&self) -> ResultStats {
        self.stats.read().await.clone()
    }

    /// Results waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Stop accepting results. Already buffered ones are still drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Start the consumer loop. Returns `None` if it is already running.
    pub async fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let mut rx = self.rx.lock().await.take()?;
        let sink = Arc::clone(self);

        Some(tokio::spawn(async move {
            tracing::debug!("Result consumer started");
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        while let Ok(result) = rx.try_recv() {
                            sink.consume(result).await;
                        }
                        break;
                    }
                    msg = rx.recv() => match msg {
                        Some(result) => sink.consume(result).await,
                        None => break,
                    },
                }
            }
            tracing::debug!("Result consumer stopped");
        }))
    }

    async fn consume(&self, result: TaskResult) {
        if result.success {
            tracing::info!(
                task_id = %result.task_id,
                task_type = %result.task_type,
                worker_id = %result.worker_id,
                attempts = result.attempts,
                duration_ms = result.duration.as_millis() as u64,
                "Task completed"
            );
        } else {
            tracing::warn!(
                task_id = %result.task_id,
                task_type = %result.task_type,
                worker_id = %result.worker_id,
                attempts = result.attempts,
                error = result.error.as_deref().unwrap_or(""),
                "Task failed"
            );
        }

        self.stats.write().await.record(&result);
        // No subscribers is fine.
        let _ = self.broadcast_tx.send(result);
    }
}
