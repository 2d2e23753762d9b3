//! Services: owners of in-flight tasks.
//!
//! - `base`: [`Service`]: live-task tracking and event normalization
//! - `batch`: [`BatchingService`]: size/time bounded submission waves
//! - `events`: [`ServiceEvent`]: what controllers observe

pub mod base;
pub mod batch;
pub mod events;

pub use base::Service;
pub use batch::{BatchConfig, BatchingService};
pub use events::ServiceEvent;

use tokio::sync::broadcast;

use crate::worker::Task;

/// Uniform submit/cancel contract controllers are written against.
pub trait TaskService: Send + Sync {
    fn name(&self) -> &str;

    /// Hand a task over for execution.
    fn deliver(&self, task: Task);

    /// Request cancellation of one tracked, running task.
    fn cancel_task(&self, task: &Task);

    /// Request cancellation of every tracked, running task.
    fn cancel_all(&self);

    /// Receive normalized task events.
    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent>;
}
