//! Base service: tracks in-flight tasks and republishes their events.
//!
//! All live-set mutation happens on one loop task, the service's owning
//! thread. Handles send commands over one channel and task events arrive over
//! another. Both are drained serially by the loop, so terminal events for a
//! task are always handled after its delivery and exactly once.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::ServiceError;
use crate::service::TaskService;
use crate::service::events::ServiceEvent;
use crate::worker::task::{Task, TaskEvent};
use crate::worker::Executor;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

enum Command {
    Deliver(Vec<Task>),
    Cancel(Task),
    CancelAll,
    Snapshot(oneshot::Sender<Vec<Task>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running service loop. Clones address the same service.
#[derive(Clone)]
pub struct Service {
    name: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ServiceEvent>,
}

impl Service {
    /// Start a service loop feeding `executor`. Must be called within a Tokio runtime.
    pub fn spawn(name: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (events, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);

        let service_loop = ServiceLoop {
            name: Arc::clone(&name),
            executor,
            live: Vec::new(),
            commands: command_rx,
            task_tx,
            task_rx,
            events: events.clone(),
            accepting: true,
            shutdown_waiters: Vec::new(),
        };
        tokio::spawn(service_loop.run());

        tracing::debug!(service = %name, "Service started");
        Self {
            name,
            commands,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register and submit a task.
    pub fn deliver(&self, task: Task) {
        self.send(Command::Deliver(vec![task]));
    }

    /// Register and submit several tasks in one step of the loop.
    pub fn deliver_batch(&self, tasks: Vec<Task>) {
        if tasks.is_empty() {
            return;
        }
        self.send(Command::Deliver(tasks));
    }

    /// Request cancellation. Ignored (with a warning) unless the task is
    /// tracked here and running. Never removes the task.
    pub fn cancel_task(&self, task: &Task) {
        self.send(Command::Cancel(task.clone()));
    }

    /// Cancel every tracked, running task.
    pub fn cancel_all(&self) {
        self.send(Command::CancelAll);
    }

    /// Subscribe to normalized task events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<ServiceEvent> {
        self.events.clone()
    }

    /// Snapshot of the live set, in delivery order.
    pub async fn live_tasks(&self) -> Vec<Task> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx));
        rx.await.unwrap_or_default()
    }

    pub async fn live_count(&self) -> usize {
        self.live_tasks().await.len()
    }

    /// Cancel everything, stop accepting work, and wait for the live set to drain.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            let err = ServiceError::Closed {
                name: self.name.to_string(),
            };
            tracing::warn!("{err}; request dropped");
        }
    }
}

impl TaskService for Service {
    fn name(&self) -> &str {
        Service::name(self)
    }

    fn deliver(&self, task: Task) {
        Service::deliver(self, task);
    }

    fn cancel_task(&self, task: &Task) {
        Service::cancel_task(self, task);
    }

    fn cancel_all(&self) {
        Service::cancel_all(self);
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        Service::subscribe(self)
    }
}

/// The owning side of a service: live set plus both inbound queues.
struct ServiceLoop {
    name: Arc<str>,
    executor: Arc<dyn Executor>,
    live: Vec<Task>,
    commands: mpsc::UnboundedReceiver<Command>,
    task_tx: mpsc::UnboundedSender<TaskEvent>,
    task_rx: mpsc::UnboundedReceiver<TaskEvent>,
    events: broadcast::Sender<ServiceEvent>,
    accepting: bool,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl ServiceLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                Some(event) = self.task_rx.recv() => self.on_task_event(event),

                command = self.commands.recv(), if self.accepting => match command {
                    Some(command) => self.on_command(command),
                    None => self.stop_accepting(),
                },
            }

            if !self.accepting && self.live.is_empty() {
                break;
            }
        }

        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        tracing::debug!(service = %self.name, "Service stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Deliver(tasks) => {
                for task in tasks {
                    self.deliver(task);
                }
            }
            Command::Cancel(task) => self.cancel(&task),
            Command::CancelAll => {
                // Iterate a snapshot; cancellation may lead to removals.
                for task in self.live.clone() {
                    self.cancel(&task);
                }
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.live.clone());
            }
            Command::Shutdown(done) => {
                self.shutdown_waiters.push(done);
                self.stop_accepting();
            }
        }
    }

    fn deliver(&mut self, task: Task) {
        if !task.attach(self.task_tx.clone()) {
            tracing::warn!(
                service = %self.name,
                task = %task,
                state = %task.state(),
                "Refusing task that is already delivered or started"
            );
            return;
        }
        self.live.push(task.clone());
        tracing::debug!(
            service = %self.name,
            task = %task,
            live = self.live.len(),
            "Task delivered"
        );
        self.executor.execute(task);
    }

    fn cancel(&self, task: &Task) {
        if !self.live.contains(task) || !task.is_running() {
            tracing::warn!(service = %self.name, task = %task, "Cancelling inactive task");
            return;
        }
        task.request_cancel();
    }

    fn stop_accepting(&mut self) {
        if !self.accepting {
            return;
        }
        self.accepting = false;
        // Pending tasks get the flag too, so they unwind as soon as they start.
        for task in &self.live {
            task.request_cancel();
        }
        tracing::info!(service = %self.name, live = self.live.len(), "Service shutting down");
    }

    fn on_task_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Started { task_id } => {
                let _ = self.events.send(ServiceEvent::TaskStarted { task_id });
            }
            TaskEvent::Progress { task_id, percent } => {
                let _ = self
                    .events
                    .send(ServiceEvent::ProgressUpdated { task_id, percent });
            }
            TaskEvent::Finished {
                task,
                success,
                result,
            } => {
                if self.untrack(&task) {
                    let _ = self.events.send(ServiceEvent::TaskCompleted {
                        task_id: task.id(),
                        success,
                        result,
                    });
                }
            }
            TaskEvent::Error { task, message } => {
                tracing::info!(service = %self.name, task = %task, "Task error: {message}");
                if self.untrack(&task) {
                    let _ = self.events.send(ServiceEvent::ErrorOccurred {
                        task_id: task.id(),
                        message,
                    });
                }
            }
        }
    }

    /// Detach and remove a task. False if it was not tracked.
    fn untrack(&mut self, task: &Task) -> bool {
        task.detach();
        match self.live.iter().position(|t| t == task) {
            Some(index) => {
                self.live.remove(index);
                true
            }
            None => {
                tracing::warn!(
                    service = %self.name,
                    task = %task,
                    "Terminal event for untracked task"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::{Value, json};

    use crate::worker::WorkerPool;

    fn service() -> Service {
        Service::spawn("test", Arc::new(WorkerPool::new(2)))
    }

    async fn next_terminal(rx: &mut broadcast::Receiver<ServiceEvent>) -> ServiceEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if event.is_terminal() {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn completed_task_is_untracked() {
        let service = service();
        let mut rx = service.subscribe();
        let task = Task::from_fn("ok", |_| Ok(json!("ok")));

        service.deliver(task.clone());

        match next_terminal(&mut rx).await {
            ServiceEvent::TaskCompleted {
                task_id,
                success,
                result,
            } => {
                assert_eq!(task_id, task.id());
                assert!(success);
                assert_eq!(result, json!("ok"));
            }
            other => panic!("Expected TaskCompleted, got {other:?}"),
        }
        assert_eq!(service.live_count().await, 0);
        assert!(!task.is_attached());
    }

    #[tokio::test]
    async fn failed_task_is_untracked() {
        let service = service();
        let mut rx = service.subscribe();
        let task = Task::from_fn("bad", |_| Err(anyhow::anyhow!("disk full")));

        service.deliver(task.clone());

        assert_eq!(
            next_terminal(&mut rx).await,
            ServiceEvent::ErrorOccurred {
                task_id: task.id(),
                message: "Task failed: disk full".to_string(),
            }
        );
        assert_eq!(service.live_count().await, 0);
    }

    #[tokio::test]
    async fn task_is_live_until_terminal() {
        let service = service();
        let gate = Arc::new(std::sync::Barrier::new(2));
        let body_gate = Arc::clone(&gate);
        let task = Task::from_fn("gated", move |_| {
            body_gate.wait();
            Ok(Value::Null)
        });
        let mut rx = service.subscribe();

        service.deliver(task.clone());
        assert_eq!(service.live_tasks().await, vec![task.clone()]);

        let waiter = Arc::clone(&gate);
        tokio::task::spawn_blocking(move || waiter.wait()).await.unwrap();
        next_terminal(&mut rx).await;
        assert!(service.live_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_untracked_is_noop() {
        let service = service();
        let stranger = Task::from_fn("stranger", |_| Ok(Value::Null));

        service.cancel_task(&stranger);
        service.cancel_all();

        assert_eq!(service.live_count().await, 0);
        assert!(!stranger.is_cancel_requested());
    }

    #[tokio::test]
    async fn double_delivery_is_refused() {
        let service = service();
        let other = Service::spawn("other", Arc::new(WorkerPool::new(1)));
        let mut rx = service.subscribe();
        let mut other_rx = other.subscribe();
        let task = Task::from_fn("once", |_| Ok(json!(1)));

        service.deliver(task.clone());
        // Make sure the first delivery has been processed before competing.
        let _ = service.live_count().await;
        service.deliver(task.clone());
        other.deliver(task.clone());

        next_terminal(&mut rx).await;
        assert_eq!(service.live_count().await, 0);
        assert_eq!(other.live_count().await, 0);
        assert!(matches!(
            other_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn cancel_all_reaches_running_tasks() {
        let service = service();
        let mut rx = service.subscribe();
        let tasks: Vec<Task> = (0..2)
            .map(|i| {
                Task::from_fn(format!("spin-{i}"), |ctx| {
                    while !ctx.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(2));
                    }
                    Ok(json!("partial"))
                })
            })
            .collect();
        for task in &tasks {
            service.deliver(task.clone());
        }
        while !tasks.iter().all(Task::is_running) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        service.cancel_all();

        for _ in 0..2 {
            match next_terminal(&mut rx).await {
                ServiceEvent::TaskCompleted { success, .. } => assert!(!success),
                other => panic!("Expected TaskCompleted, got {other:?}"),
            }
        }
        assert_eq!(service.live_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_drains_and_closes() {
        let service = service();
        service.deliver(Task::from_fn("spin", |ctx| {
            while !ctx.is_cancelled() {
                std::thread::sleep(Duration::from_millis(2));
            }
            Ok(Value::Null)
        }));

        tokio::time::timeout(Duration::from_secs(5), service.shutdown())
            .await
            .unwrap();

        // Requests after shutdown are dropped.
        service.deliver(Task::from_fn("late", |_| Ok(Value::Null)));
        assert!(service.live_tasks().await.is_empty());
    }
}
