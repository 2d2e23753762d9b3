//! Dedicated event-loop threads for long-running IO tasks.
//!
//! Blocking IO would starve the compute pool, so IO tasks run on a small set
//! of threads, each driving its own current-thread Tokio runtime. A task is
//! pinned to the loop it was submitted to. Work posted to a running task from
//! other threads goes through a [`Mailbox`], whose `Notify` wake-up resumes
//! the waiting task on its own loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use rand::Rng;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinSet;

use crate::worker::Executor;
use crate::worker::task::Task;

const STOPPED: &str = "IO worker stopped";

/// One thread running one event loop.
struct IoWorker {
    index: usize,
    tx: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl IoWorker {
    fn spawn(index: usize, active: Arc<AtomicUsize>) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name(format!("io-worker-{index}"))
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel::<Task>();
        let (stop_tx, stop_rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name(format!("io-worker-{index}"))
            .spawn(move || {
                runtime.block_on(event_loop(index, rx, stop_rx, active));
                tracing::debug!(worker = index, "IO event loop stopped");
            })?;

        tracing::debug!(worker = index, "IO event loop started");
        Ok(Self {
            index,
            tx: Mutex::new(Some(tx)),
            stop: Mutex::new(Some(stop_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Hand a task to this worker's loop. False once stopped.
    fn submit(&self, task: Task) -> bool {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        }
    }

    fn stop(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let stop = self
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread
            && thread.join().is_err()
        {
            tracing::error!(worker = self.index, "IO worker thread panicked");
        }
    }
}

/// Run submitted tasks until stopped, then settle every one of them.
///
/// On stop, tasks still queued are rejected, tasks spawned but not yet
/// started are rejected, and running tasks are asked to cancel. The loop
/// returns only once every task it accepted has reached a terminal state.
async fn event_loop(
    index: usize,
    mut rx: mpsc::UnboundedReceiver<Task>,
    mut stop: oneshot::Receiver<()>,
    active: Arc<AtomicUsize>,
) {
    let mut running = JoinSet::new();
    let mut live: Vec<Task> = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            next = rx.recv() => match next {
                Some(task) => {
                    live.push(task.clone());
                    let active = Arc::clone(&active);
                    running.spawn(async move {
                        // Rejected while waiting for its first poll.
                        if task.state().is_terminal() {
                            return;
                        }
                        active.fetch_add(1, Ordering::AcqRel);
                        task.run().await;
                        active.fetch_sub(1, Ordering::AcqRel);
                    });
                }
                None => break,
            },
            Some(_) = running.join_next(), if !running.is_empty() => {
                live.retain(|task| !task.state().is_terminal());
            }
        }
    }

    rx.close();
    while let Ok(task) = rx.try_recv() {
        tracing::warn!(task = %task, worker = index, "Rejecting queued IO task");
        task.reject(STOPPED);
    }
    for task in live.iter().filter(|task| !task.state().is_terminal()) {
        if task.is_running() {
            task.request_cancel();
        } else {
            task.reject(STOPPED);
        }
    }
    if !running.is_empty() {
        tracing::info!(worker = index, tasks = running.len(), "Draining IO tasks");
    }
    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            tracing::error!(worker = index, error = %e, "IO task aborted");
        }
    }
}

struct IoPoolInner {
    workers: Vec<IoWorker>,
    active: Arc<AtomicUsize>,
}

/// Set of IO event loops. Clones share the same threads.
#[derive(Clone)]
pub struct IoWorkerPool {
    inner: Arc<IoPoolInner>,
}

impl IoWorkerPool {
    /// Start `num_workers` event-loop threads (at least one).
    pub fn new(num_workers: usize) -> std::io::Result<Self> {
        let active = Arc::new(AtomicUsize::new(0));
        let workers = (0..num_workers.max(1))
            .map(|index| IoWorker::spawn(index, Arc::clone(&active)))
            .collect::<std::io::Result<Vec<_>>>()?;
        tracing::info!(workers = workers.len(), "IO worker pool started");
        Ok(Self {
            inner: Arc::new(IoPoolInner { workers, active }),
        })
    }

    pub fn num_workers(&self) -> usize {
        self.inner.workers.len()
    }

    fn pick(&self) -> &IoWorker {
        let index = rand::thread_rng().gen_range(0..self.inner.workers.len());
        &self.inner.workers[index]
    }

    /// Stop every loop and join its thread.
    ///
    /// Running tasks are cancelled and awaited, queued ones are rejected, so
    /// each reaches a terminal state. Blocks until cancelled bodies return.
    /// Must not be called from an IO worker thread.
    pub fn shutdown(&self) {
        for worker in &self.inner.workers {
            worker.stop();
        }
        tracing::info!("IO worker pool stopped");
    }
}

impl Executor for IoWorkerPool {
    fn execute(&self, task: Task) {
        let worker = self.pick();
        tracing::debug!(task = %task, worker = worker.index, "IO task submitted");

        if !worker.submit(task.clone()) {
            tracing::error!(task = %task, "{STOPPED}");
            task.reject(STOPPED);
        }
    }

    fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }
}

/// Cross-thread request queue for a task pinned to an event loop.
///
/// Any thread may `post`; only the owning task should `recv`.
pub struct Mailbox<T> {
    queue: Mutex<VecDeque<T>>,
    wake: Notify,
    closed: AtomicBool,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue one item and wake the owner. False if the mailbox is closed.
    pub fn post(&self, item: T) -> bool {
        self.post_all(std::iter::once(item))
    }

    /// Queue several items under one lock and wake the owner once.
    pub fn post_all(&self, items: impl IntoIterator<Item = T>) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return false;
        }
        queue.extend(items);
        drop(queue);
        self.wake.notify_one();
        true
    }

    /// Pop the oldest item without waiting.
    pub fn try_recv(&self) -> Option<T> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Wait for the next item. `None` once closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_recv() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Refuse further posts and wake the owner so it can drain and exit.
    pub fn close(&self) {
        // Taken so no post can land after a drain that follows `close`.
        let _queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::Release);
        self.wake.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::ThreadId;
    use std::time::Duration;

    use crate::worker::TaskState;
    use crate::worker::task::{AsyncExecute, TaskContext, TaskEvent};
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct ThreadName;

    #[async_trait]
    impl AsyncExecute for ThreadName {
        async fn execute(&mut self, _ctx: TaskContext) -> anyhow::Result<Value> {
            let name = std::thread::current().name().unwrap_or_default().to_string();
            Ok(json!(name))
        }
    }

    struct UntilCancelled;

    #[async_trait]
    impl AsyncExecute for UntilCancelled {
        async fn execute(&mut self, ctx: TaskContext) -> anyhow::Result<Value> {
            ctx.cancelled().await;
            Ok(json!("stopped"))
        }
    }

    /// Answers each posted request with the id of the thread serving it.
    struct ThreadEcho {
        started_on: Arc<Mutex<Option<ThreadId>>>,
        mailbox: Arc<Mailbox<oneshot::Sender<ThreadId>>>,
    }

    #[async_trait]
    impl AsyncExecute for ThreadEcho {
        async fn execute(&mut self, ctx: TaskContext) -> anyhow::Result<Value> {
            *self.started_on.lock().unwrap() = Some(std::thread::current().id());
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => return Ok(Value::Null),
                    next = self.mailbox.recv() => match next {
                        Some(reply) => {
                            let _ = reply.send(std::thread::current().id());
                        }
                        None => return Ok(Value::Null),
                    },
                }
            }
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn async_task_runs_on_io_thread() {
        let pool = IoWorkerPool::new(2).unwrap();
        let task = Task::new_async("thread-name", ThreadName);
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(task.attach(tx));

        pool.execute(task.clone());

        let finished = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(TaskEvent::Finished { result, .. }) => return result,
                    Some(_) => continue,
                    None => panic!("channel closed"),
                }
            }
        })
        .await
        .unwrap();

        assert!(finished.as_str().unwrap().starts_with("io-worker-"));
        pool.shutdown();
    }

    #[tokio::test]
    async fn stopped_pool_rejects_tasks() {
        let pool = IoWorkerPool::new(1).unwrap();
        pool.shutdown();

        let task = Task::new_async("late", ThreadName);
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(task.attach(tx));
        pool.execute(task.clone());

        assert!(matches!(rx.recv().await, Some(TaskEvent::Error { .. })));
        assert_eq!(task.state(), crate::worker::TaskState::Failed);
    }

    #[tokio::test]
    async fn shutdown_settles_every_accepted_task() {
        let pool = IoWorkerPool::new(2).unwrap();
        let tasks: Vec<Task> = (0..16)
            .map(|i| Task::new_async(format!("wait-{i}"), UntilCancelled))
            .collect();
        for task in &tasks {
            pool.execute(task.clone());
        }
        let first = tasks[0].clone();
        wait_until(|| first.is_running()).await;

        let stopper = pool.clone();
        tokio::time::timeout(
            Duration::from_secs(5),
            tokio::task::spawn_blocking(move || stopper.shutdown()),
        )
        .await
        .unwrap()
        .unwrap();

        for task in &tasks {
            match task.state() {
                TaskState::Cancelled => assert_eq!(task.result(), Some(json!("stopped"))),
                TaskState::Failed => assert_eq!(
                    task.error().as_deref(),
                    Some("Task rejected: IO worker stopped")
                ),
                other => panic!("{task} left in {other}"),
            }
        }
        assert_eq!(tasks[0].state(), TaskState::Cancelled);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn posts_from_other_threads_are_served_on_the_task_loop() {
        let pool = IoWorkerPool::new(4).unwrap();
        let started_on = Arc::new(Mutex::new(None));
        let mailbox = Arc::new(Mailbox::new());
        let task = Task::new_async(
            "echo",
            ThreadEcho {
                started_on: Arc::clone(&started_on),
                mailbox: Arc::clone(&mailbox),
            },
        );
        pool.execute(task.clone());

        let poster = Arc::clone(&mailbox);
        let remote = std::thread::spawn(move || {
            (0..3)
                .map(|_| {
                    let (tx, rx) = oneshot::channel();
                    assert!(poster.post(tx));
                    rx.blocking_recv().unwrap()
                })
                .collect::<Vec<_>>()
        });
        let served_on = tokio::time::timeout(
            Duration::from_secs(5),
            tokio::task::spawn_blocking(move || remote.join().unwrap()),
        )
        .await
        .unwrap()
        .unwrap();

        let home = started_on.lock().unwrap().unwrap();
        assert_ne!(home, std::thread::current().id());
        assert_eq!(served_on, vec![home; 3]);

        mailbox.close();
        wait_until(|| task.state().is_terminal()).await;
        assert_eq!(task.state(), TaskState::Completed);
        pool.shutdown();
    }

    #[tokio::test]
    async fn mailbox_wakes_receiver_from_another_thread() {
        let mailbox = Arc::new(Mailbox::new());

        let poster = Arc::clone(&mailbox);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            assert!(poster.post_all([1, 2, 3]));
        });

        let mut got = Vec::new();
        for _ in 0..3 {
            let item = tokio::time::timeout(Duration::from_secs(2), mailbox.recv())
                .await
                .unwrap();
            got.push(item.unwrap());
        }
        assert_eq!(got, vec![1, 2, 3]);
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn closed_mailbox_drains_then_ends() {
        let mailbox = Mailbox::new();
        assert!(mailbox.post("a"));
        mailbox.close();
        assert!(!mailbox.post("b"));

        assert_eq!(mailbox.recv().await, Some("a"));
        assert_eq!(mailbox.recv().await, None);
    }
}
