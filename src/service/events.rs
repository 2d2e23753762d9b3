//! Normalized events a Service publishes to controllers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Service-level events, fanned out over a broadcast channel.
///
/// Every task-related variant names its originating task, so progress and
/// completions of concurrently running tasks can be told apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceEvent {
    /// A task body started executing.
    TaskStarted { task_id: Uuid },
    /// A task reported progress (0-100).
    ProgressUpdated { task_id: Uuid, percent: u8 },
    /// A task returned; `success` is false if it observed cancellation.
    TaskCompleted {
        task_id: Uuid,
        success: bool,
        result: Value,
    },
    /// A task failed.
    ErrorOccurred { task_id: Uuid, message: String },
    /// A batching service handed a wave of `count` tasks to its base service.
    BatchFlushed { count: usize },
}

impl ServiceEvent {
    /// Originating task, if the event concerns a single task.
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::TaskStarted { task_id }
            | Self::ProgressUpdated { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::ErrorOccurred { task_id, .. } => Some(*task_id),
            Self::BatchFlushed { .. } => None,
        }
    }

    /// True for `TaskCompleted` and `ErrorOccurred`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TaskCompleted { .. } | Self::ErrorOccurred { .. }
        )
    }
}
