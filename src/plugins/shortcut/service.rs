use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::ServiceError;
use crate::plugins::shortcut::task::ShortcutCreationTask;
use crate::service::{Service, ServiceEvent, TaskService};
use crate::worker::{Executor, Task};

/// Missing files named in a validation error.
const MAX_LISTED_MISSING: usize = 3;

/// Validates shortcut requests and runs them on the compute pool.
#[derive(Clone)]
pub struct ShortcutCreatorService {
    service: Service,
}

impl ShortcutCreatorService {
    pub fn spawn(executor: Arc<dyn Executor>) -> Self {
        Self {
            service: Service::spawn("ShortcutCreatorService", executor),
        }
    }

    /// Check a request before any task is created.
    pub fn validate_input(&self, target_dir: &str, files: &[PathBuf]) -> Result<(), ServiceError> {
        if target_dir.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "Target directory must not be empty".into(),
            ));
        }
        if !Path::new(target_dir).is_dir() {
            return Err(ServiceError::InvalidInput(format!(
                "{target_dir} does not exist or is not a directory"
            )));
        }
        if files.is_empty() {
            return Err(ServiceError::InvalidInput(
                "Select at least one file".into(),
            ));
        }

        let missing: Vec<_> = files.iter().filter(|f| !f.exists()).collect();
        if !missing.is_empty() {
            let listed = missing
                .iter()
                .take(MAX_LISTED_MISSING)
                .map(|f| f.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let more = if missing.len() > MAX_LISTED_MISSING {
                " and more"
            } else {
                ""
            };
            return Err(ServiceError::InvalidInput(format!(
                "These files do not exist: {listed}{more}"
            )));
        }
        Ok(())
    }

    pub fn create_shortcuts(&self, target_dir: &str, files: Vec<PathBuf>) -> Task {
        let task = Task::new(
            "ShortcutCreationTask",
            ShortcutCreationTask::new(target_dir, files),
        );
        self.service.deliver(task.clone());
        task
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub async fn shutdown(&self) {
        self.service.shutdown().await;
    }
}

impl TaskService for ShortcutCreatorService {
    fn name(&self) -> &str {
        self.service.name()
    }

    fn deliver(&self, task: Task) {
        self.service.deliver(task);
    }

    fn cancel_task(&self, task: &Task) {
        self.service.cancel_task(task);
    }

    fn cancel_all(&self) {
        self.service.cancel_all();
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.service.subscribe()
    }
}
