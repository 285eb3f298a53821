//! Task queue: bounded FIFO hand-off between submission and dispatch.
//!
//! Holds task ids only; the tasks themselves live in the store. A full queue
//! makes producers wait up to the configured timeout and then reject, which
//! is the scheduler's only backpressure mechanism.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::QueueError;

/// Bounded queue of pending task ids with a single consumer.
pub struct TaskQueue {
    tx: mpsc::Sender<Uuid>,
    rx: Mutex<mpsc::Receiver<Uuid>>,
    enqueue_timeout: Duration,
    closed: AtomicBool,
}

impl TaskQueue {
    /// Create a queue holding at most `capacity` ids.
    pub fn new(capacity: usize, enqueue_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            enqueue_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Append a task id, waiting up to the enqueue timeout while full.
    pub async fn enqueue(&self, task_id: Uuid) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        if self.enqueue_timeout.is_zero() {
            return self.try_enqueue(task_id);
        }

        match self.tx.send_timeout(task_id, self.enqueue_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(QueueError::Full {
                capacity: self.capacity(),
                waited: self.enqueue_timeout,
            }),
            Err(SendTimeoutError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// Append a task id without waiting.
    pub fn try_enqueue(&self, task_id: Uuid) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.tx.try_send(task_id).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full {
                capacity: self.capacity(),
                waited: Duration::ZERO,
            },
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Put a task id back at the tail after `delay`.
    ///
    /// Never drops the id: when the queue is full the re-queue waits in a
    /// background task until space frees up or `cancel` fires.
    pub fn requeue_after(&self, task_id: Uuid, delay: Duration, cancel: CancellationToken) {
        if delay.is_zero() {
            match self.try_enqueue(task_id) {
                Ok(()) => return,
                Err(QueueError::Closed) => {
                    debug!(task_id = %task_id, "Queue closed, not re-queueing");
                    return;
                }
                Err(QueueError::Full { .. }) => {}
            }
        }

        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(task_id = %task_id, "Re-queue abandoned on shutdown");
                }
                sent = async {
                    tokio::time::sleep(delay).await;
                    tx.send(task_id).await
                } => {
                    if sent.is_err() {
                        warn!(task_id = %task_id, "Queue closed before re-queue");
                    }
                }
            }
        });
    }

    /// Next task id in FIFO order. `None` once the queue is closed and empty.
    pub async fn dequeue(&self) -> Option<Uuid> {
        self.rx.lock().await.recv().await
    }

    /// Number of ids currently waiting.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reject further producers. Ids already queued can still be drained.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // A consumer parked in `dequeue` holds the lock; producers are still
        // turned away by the flag.
        if let Ok(mut rx) = self.rx.try_lock() {
            rx.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order() {
        let queue = TaskQueue::new(4, Duration::from_millis(10));
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.enqueue(*id).await.unwrap();
        }
        assert_eq!(queue.depth(), 3);

        for id in &ids {
            assert_eq!(queue.dequeue().await, Some(*id));
        }
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn full_queue_rejects_after_wait() {
        let queue = TaskQueue::new(2, Duration::from_millis(20));
        queue.enqueue(Uuid::new_v4()).await.unwrap();
        queue.enqueue(Uuid::new_v4()).await.unwrap();

        let started = std::time::Instant::now();
        let err = queue.enqueue(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, QueueError::Full { capacity: 2, .. }));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn waiting_producer_gets_in_when_space_frees() {
        let queue = std::sync::Arc::new(TaskQueue::new(1, Duration::from_secs(2)));
        queue.enqueue(Uuid::new_v4()).await.unwrap();

        let consumer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            consumer.dequeue().await;
        });

        assert!(queue.enqueue(Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn try_enqueue_reports_full_immediately() {
        let queue = TaskQueue::new(1, Duration::from_secs(5));
        queue.try_enqueue(Uuid::new_v4()).unwrap();
        assert!(matches!(
            queue.try_enqueue(Uuid::new_v4()),
            Err(QueueError::Full { waited, .. }) if waited.is_zero()
        ));
    }

    #[tokio::test]
    async fn requeue_goes_to_tail() {
        let queue = TaskQueue::new(4, Duration::from_millis(10));
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        queue.enqueue(first).await.unwrap();
        queue.enqueue(second).await.unwrap();

        let head = queue.dequeue().await.unwrap();
        queue.requeue_after(head, Duration::ZERO, CancellationToken::new());

        assert_eq!(queue.dequeue().await, Some(second));
        assert_eq!(queue.dequeue().await, Some(first));
    }

    #[tokio::test]
    async fn delayed_requeue_waits_for_space() {
        let queue = TaskQueue::new(1, Duration::from_millis(10));
        let blocker = Uuid::new_v4();
        let retried = Uuid::new_v4();
        queue.enqueue(blocker).await.unwrap();

        queue.requeue_after(retried, Duration::ZERO, CancellationToken::new());
        assert_eq!(queue.dequeue().await, Some(blocker));

        let next = tokio::time::timeout(Duration::from_secs(1), queue.dequeue())
            .await
            .unwrap();
        assert_eq!(next, Some(retried));
    }

    #[tokio::test]
    async fn closed_queue_rejects() {
        let queue = TaskQueue::new(2, Duration::from_millis(10));
        queue.close();
        queue.close();
        assert!(matches!(
            queue.enqueue(Uuid::new_v4()).await,
            Err(QueueError::Closed)
        ));
        assert_eq!(queue.dequeue().await, None);
    }
}
