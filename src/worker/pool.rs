//! Bounded worker pool for compute tasks.
//!
//! At most `max_concurrent` tasks execute at once. Each blocking body holds
//! one permit for its entire run; tasks do not yield their slot mid-body.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};

use crate::worker::Executor;
use crate::worker::task::Task;

/// Default concurrency cap.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

struct PoolInner {
    max_concurrent: usize,
    permits: Arc<Semaphore>,
    /// Tasks currently executing a body.
    active: AtomicUsize,
    /// Tasks submitted and not yet finished (queued + active).
    outstanding: AtomicUsize,
    idle: Notify,
}

/// Semaphore-capped executor. Clones share the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl WorkerPool {
    /// Create a pool running at most `max_concurrent` tasks at once.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            inner: Arc::new(PoolInner {
                max_concurrent,
                permits: Arc::new(Semaphore::new(max_concurrent)),
                active: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Number of tasks currently executing.
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Number of tasks queued or executing.
    pub fn outstanding_count(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Stop starting tasks. Queued and later submissions are rejected;
    /// tasks already executing run to completion.
    pub fn close(&self) {
        if !self.inner.permits.is_closed() {
            tracing::info!(
                outstanding = self.outstanding_count(),
                "Worker pool closed"
            );
        }
        self.inner.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    /// Wait until every submitted task has finished.
    ///
    /// Returns `false` if `timeout` elapses first; `None` waits forever.
    pub async fn wait_for_all(&self, timeout: Option<Duration>) -> bool {
        let drained = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.outstanding_count() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, drained).await.is_ok(),
            None => {
                drained.await;
                true
            }
        }
    }
}

impl Executor for WorkerPool {
    /// Enqueue `task`; returns immediately. Must be called within a Tokio runtime.
    fn execute(&self, task: Task) {
        tracing::debug!(task = %task, task_id = %task.id(), "New task queued");
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            match Arc::clone(&inner.permits).acquire_owned().await {
                Ok(_permit) => {
                    inner.active.fetch_add(1, Ordering::AcqRel);
                    task.run().await;
                    inner.active.fetch_sub(1, Ordering::AcqRel);
                }
                Err(_) => {
                    tracing::warn!(task = %task, "Rejecting task, worker pool closed");
                    task.reject("worker pool closed");
                }
            }

            if inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
                inner.idle.notify_waiters();
            }
        });
    }

    fn active_count(&self) -> usize {
        WorkerPool::active_count(self)
    }
}
