//! Batching service: accumulate requests, submit them in waves.
//!
//! `Idle → Accumulating → (size threshold | timer) → Flushing → Idle`.
//! The pending queue is owned by the batch loop, and its length is the
//! accumulated size. A flush hands the whole queue to the base service as a
//! single `deliver_batch`, so observers never see a partial wave.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::error::ServiceError;
use crate::service::TaskService;
use crate::service::base::Service;
use crate::service::events::ServiceEvent;
use crate::worker::Executor;
use crate::worker::task::Task;

/// Batching limits.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Queue length that triggers an immediate flush.
    pub max_batch_size: usize,
    /// Longest a request waits before the timer flushes it.
    pub interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            interval: Duration::from_millis(500),
        }
    }
}

enum BatchCommand {
    Deliver(Task),
    Flush,
    PendingCount(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a batching service. Clones address the same service.
#[derive(Clone)]
pub struct BatchingService {
    base: Service,
    commands: mpsc::UnboundedSender<BatchCommand>,
    config: BatchConfig,
}

impl BatchingService {
    /// Start a batch loop in front of a new base service. Must be called
    /// within a Tokio runtime.
    pub fn spawn(
        name: impl Into<String>,
        executor: Arc<dyn Executor>,
        config: BatchConfig,
    ) -> Self {
        let config = BatchConfig {
            max_batch_size: config.max_batch_size.max(1),
            interval: config.interval.max(Duration::from_millis(1)),
        };
        let base = Service::spawn(name, executor);
        let (commands, command_rx) = mpsc::unbounded_channel();

        let batch_loop = BatchLoop {
            base: base.clone(),
            events: base.event_sender(),
            config: config.clone(),
            pending: Vec::with_capacity(config.max_batch_size),
            commands: command_rx,
        };
        tokio::spawn(batch_loop.run());

        Self {
            base,
            commands,
            config,
        }
    }

    pub fn name(&self) -> &str {
        self.base.name()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// The service that receives flushed waves.
    pub fn base(&self) -> &Service {
        &self.base
    }

    /// Queue a request for the next wave.
    pub fn deliver(&self, task: Task) {
        self.send(BatchCommand::Deliver(task));
    }

    /// Flush now, whatever the queue length.
    pub fn flush(&self) {
        self.send(BatchCommand::Flush);
    }

    /// Number of requests waiting for the next wave.
    pub async fn pending_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.send(BatchCommand::PendingCount(tx));
        rx.await.unwrap_or_default()
    }

    /// Tasks already handed to the base service and not yet terminated.
    pub async fn live_tasks(&self) -> Vec<Task> {
        self.base.live_tasks().await
    }

    /// Drop pending requests, then shut the base service down.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(BatchCommand::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        self.base.shutdown().await;
    }

    fn send(&self, command: BatchCommand) {
        if self.commands.send(command).is_err() {
            let err = ServiceError::Closed {
                name: self.name().to_string(),
            };
            tracing::warn!("{err}; request dropped");
        }
    }
}

impl TaskService for BatchingService {
    fn name(&self) -> &str {
        BatchingService::name(self)
    }

    fn deliver(&self, task: Task) {
        BatchingService::deliver(self, task);
    }

    /// Only tasks already flushed to the base service can be cancelled.
    fn cancel_task(&self, task: &Task) {
        self.base.cancel_task(task);
    }

    fn cancel_all(&self) {
        self.base.cancel_all();
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.base.subscribe()
    }
}

struct BatchLoop {
    base: Service,
    events: broadcast::Sender<ServiceEvent>,
    config: BatchConfig,
    pending: Vec<Task>,
    commands: mpsc::UnboundedReceiver<BatchCommand>,
}

impl BatchLoop {
    async fn run(mut self) {
        let period = self.config.interval;
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(BatchCommand::Deliver(task)) => self.deliver(task, &mut timer),
                    Some(BatchCommand::Flush) => self.flush(&mut timer),
                    Some(BatchCommand::PendingCount(reply)) => {
                        let _ = reply.send(self.pending.len());
                    }
                    Some(BatchCommand::Shutdown(done)) => {
                        self.discard_pending();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        // Every handle is gone, nobody is left to observe a wave.
                        self.discard_pending();
                        break;
                    }
                },
                _ = timer.tick() => self.flush(&mut timer),
            }
        }
        tracing::debug!(service = %self.base.name(), "Batch loop stopped");
    }

    fn deliver(&mut self, task: Task, timer: &mut Interval) {
        // Never grow past the cap.
        if self.pending.len() >= self.config.max_batch_size {
            self.flush(timer);
        }
        self.pending.push(task);
        if self.pending.len() >= self.config.max_batch_size {
            self.flush(timer);
        }
    }

    fn discard_pending(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                service = %self.base.name(),
                discarded = self.pending.len(),
                "Discarding unflushed requests"
            );
        }
        self.pending.clear();
    }

    fn flush(&mut self, timer: &mut Interval) {
        if !self.pending.is_empty() {
            let wave = std::mem::take(&mut self.pending);
            let count = wave.len();
            tracing::debug!(service = %self.base.name(), count, "Flushing batch");
            self.base.deliver_batch(wave);
            let _ = self.events.send(ServiceEvent::BatchFlushed { count });
        }
        timer.reset();
    }
}
