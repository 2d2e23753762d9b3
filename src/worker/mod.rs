//! Worker system: task lifecycle and execution substrates.
//!
//! Core components:
//! - `state`: Task state machine (Pending → Running → Completed/Cancelled/Failed)
//! - `task`: Task handle, bodies, lifecycle events
//! - `pool`: Semaphore-capped compute pool
//! - `io`: Dedicated event-loop threads for long-running IO tasks

pub mod io;
pub mod pool;
pub mod state;
pub mod task;

pub use io::{IoWorkerPool, Mailbox};
pub use pool::WorkerPool;
pub use state::TaskState;
pub use task::{AsyncExecute, Execute, Task, TaskContext, TaskEvent, TaskKind};

/// Something that can run tasks off the calling thread.
///
/// `execute` must return immediately. A task the executor cannot run is
/// rejected (it fails with an error event) rather than silently dropped, so
/// the delivering Service always sees a terminal event.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);

    /// Number of tasks currently executing.
    fn active_count(&self) -> usize;
}
