//! Cancellable units of background work.
//!
//! A [`Task`] pairs a body (blocking [`Execute`] or async [`AsyncExecute`])
//! with the lifecycle a Service observes:
//! `Started → Progress* → (Finished | Error)`. The terminal event is guarded
//! by the [`TaskState`] transition, so it fires exactly once per task even if
//! the body panics.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use crate::error::TaskError;
use crate::worker::state::TaskState;

/// Body of a task that runs on a blocking worker thread.
///
/// Poll [`TaskContext::is_cancelled`] at safe points. On cancellation, undo
/// whatever partial side effects can be undone and return normally; the task
/// then finishes with `success = false`. Return `Err` only for genuine
/// failures.
pub trait Execute: Send + 'static {
    fn execute(&mut self, ctx: &TaskContext) -> anyhow::Result<Value>;
}

/// Body of a task that runs on an event loop.
#[async_trait]
pub trait AsyncExecute: Send + 'static {
    async fn execute(&mut self, ctx: TaskContext) -> anyhow::Result<Value>;
}

/// Adapter running a closure as a blocking body.
struct FnBody<F>(F);

impl<F> Execute for FnBody<F>
where
    F: FnMut(&TaskContext) -> anyhow::Result<Value> + Send + 'static,
{
    fn execute(&mut self, ctx: &TaskContext) -> anyhow::Result<Value> {
        (self.0)(ctx)
    }
}

enum Body {
    Blocking(Box<dyn Execute>),
    Async(Box<dyn AsyncExecute>),
}

/// How a task's body runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Blocking,
    Async,
}

/// Lifecycle events raised by a running task.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Started { task_id: Uuid },
    Progress { task_id: Uuid, percent: u8 },
    Finished { task: Task, success: bool, result: Value },
    Error { task: Task, message: String },
}

impl TaskEvent {
    /// Get the task ID from any variant.
    pub fn task_id(&self) -> Uuid {
        match self {
            Self::Started { task_id } | Self::Progress { task_id, .. } => *task_id,
            Self::Finished { task, .. } | Self::Error { task, .. } => task.id(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Error { .. })
    }
}

/// Channel a Service listens on for task events.
pub type EventSender = mpsc::UnboundedSender<TaskEvent>;

struct TaskInner {
    id: Uuid,
    name: String,
    kind: TaskKind,
    state: Mutex<TaskState>,
    cancel_requested: AtomicBool,
    cancel_notify: Notify,
    body: Mutex<Option<Body>>,
    listener: Mutex<Option<EventSender>>,
    result: Mutex<Option<Value>>,
    error: Mutex<Option<String>>,
}

/// Shared handle to a task. Clones refer to the same task.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Create a task with a blocking body.
    pub fn new(name: impl Into<String>, body: impl Execute) -> Self {
        Self::with_body(name.into(), TaskKind::Blocking, Body::Blocking(Box::new(body)))
    }

    /// Create a blocking task from a closure.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&TaskContext) -> anyhow::Result<Value> + Send + 'static,
    {
        Self::new(name, FnBody(f))
    }

    /// Create a task with an async body.
    pub fn new_async(name: impl Into<String>, body: impl AsyncExecute) -> Self {
        Self::with_body(name.into(), TaskKind::Async, Body::Async(Box::new(body)))
    }

    fn with_body(name: String, kind: TaskKind, body: Body) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: Uuid::new_v4(),
                name,
                kind,
                state: Mutex::new(TaskState::Pending),
                cancel_requested: AtomicBool::new(false),
                cancel_notify: Notify::new(),
                body: Mutex::new(Some(body)),
                listener: Mutex::new(None),
                result: Mutex::new(None),
                error: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> TaskKind {
        self.inner.kind
    }

    pub fn state(&self) -> TaskState {
        *lock(&self.inner.state)
    }

    /// True between the start event and the terminal event.
    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::Acquire)
    }

    /// Result payload, once the task has finished.
    pub fn result(&self) -> Option<Value> {
        lock(&self.inner.result).clone()
    }

    /// Error message, once the task has failed.
    pub fn error(&self) -> Option<String> {
        lock(&self.inner.error).clone()
    }

    /// Ask the body to stop at its next safe point. Never interrupts a thread.
    pub fn request_cancel(&self) {
        tracing::debug!(task = %self, "Cancellation requested");
        self.inner.cancel_requested.store(true, Ordering::Release);
        self.inner.cancel_notify.notify_waiters();
    }

    /// Connect a listener. Refused if one is connected or the task has started.
    pub(crate) fn attach(&self, sender: EventSender) -> bool {
        let mut listener = lock(&self.inner.listener);
        if listener.is_some() || self.state() != TaskState::Pending {
            return false;
        }
        *listener = Some(sender);
        true
    }

    /// Disconnect the listener; later events are dropped.
    pub(crate) fn detach(&self) {
        lock(&self.inner.listener).take();
    }

    /// Whether a service is currently listening to this task.
    pub fn is_attached(&self) -> bool {
        lock(&self.inner.listener).is_some()
    }

    fn emit(&self, event: TaskEvent) {
        match lock(&self.inner.listener).as_ref() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    tracing::trace!(task = %self, "Listener gone, event dropped");
                }
            }
            None => tracing::trace!(task = %self, "No listener, event dropped"),
        }
    }

    fn transition(&self, target: TaskState) -> bool {
        let mut state = lock(&self.inner.state);
        if !state.can_transition_to(target) {
            let err = TaskError::InvalidTransition {
                id: self.id(),
                name: self.name().to_string(),
                state: state.to_string(),
                target: target.to_string(),
            };
            tracing::warn!("{err}");
            return false;
        }
        *state = target;
        true
    }

    /// Execute the body. Called by executors only.
    ///
    /// Blocking bodies move onto a blocking thread; async bodies run on the
    /// calling loop. Errors and panics become the `Error` event and never
    /// escape this call.
    pub(crate) async fn run(&self) {
        let Some(body) = lock(&self.inner.body).take() else {
            let err = TaskError::AlreadyExecuted {
                id: self.id(),
                name: self.name().to_string(),
            };
            tracing::warn!("{err}");
            return;
        };
        if !self.transition(TaskState::Running) {
            return;
        }

        tracing::info!(task = %self, task_id = %self.id(), "Task started");
        self.emit(TaskEvent::Started { task_id: self.id() });

        let ctx = TaskContext { task: self.clone() };
        let outcome = match body {
            Body::Blocking(mut body) => {
                match tokio::task::spawn_blocking(move || body.execute(&ctx)).await {
                    Ok(result) => Ok(result),
                    Err(e) if e.is_panic() => Err(panic_message(e.into_panic())),
                    Err(e) => Err(e.to_string()),
                }
            }
            Body::Async(mut body) => {
                match AssertUnwindSafe(body.execute(ctx)).catch_unwind().await {
                    Ok(result) => Ok(result),
                    Err(panic) => Err(panic_message(panic)),
                }
            }
        };

        self.finish(outcome);
    }

    fn finish(&self, outcome: Result<anyhow::Result<Value>, String>) {
        match outcome {
            Ok(Ok(result)) => {
                let success = !self.is_cancel_requested();
                let target = if success {
                    TaskState::Completed
                } else {
                    TaskState::Cancelled
                };
                if !self.transition(target) {
                    return;
                }
                *lock(&self.inner.result) = Some(result.clone());
                tracing::info!(task = %self, task_id = %self.id(), success, "Task finished");
                self.emit(TaskEvent::Finished {
                    task: self.clone(),
                    success,
                    result,
                });
            }
            Ok(Err(e)) => self.fail(format!("Task failed: {e:#}")),
            Err(panic) => self.fail(format!("Task failed: panicked: {panic}")),
        }
    }

    /// Fail a task that an executor could not run.
    pub(crate) fn reject(&self, reason: &str) {
        lock(&self.inner.body).take();
        self.fail(format!("Task rejected: {reason}"));
    }

    fn fail(&self, message: String) {
        if !self.transition(TaskState::Failed) {
            return;
        }
        tracing::error!(task = %self, task_id = %self.id(), "{message}");
        *lock(&self.inner.error) = Some(message.clone());
        self.emit(TaskEvent::Error {
            task: self.clone(),
            message,
        });
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Task {}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

/// View of the running task handed to its body.
#[derive(Clone)]
pub struct TaskContext {
    task: Task,
}

impl TaskContext {
    pub fn task_id(&self) -> Uuid {
        self.task.id()
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancel_requested()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.task.inner.cancel_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Report progress in percent, clamped to 100.
    pub fn report_progress(&self, percent: u32) {
        let percent = percent.min(100) as u8;
        self.task.emit(TaskEvent::Progress {
            task_id: self.task.id(),
            percent,
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
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
