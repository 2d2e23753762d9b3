use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::plugin::ViewModel;
use crate::plugins::forward_events;
use crate::plugins::shortcut::service::ShortcutCreatorService;
use crate::service::{ServiceEvent, TaskService};
use crate::worker::Task;

pub struct ShortcutCreatorController {
    view: Arc<ViewModel>,
    service: ShortcutCreatorService,
    pump: JoinHandle<()>,
}

impl ShortcutCreatorController {
    pub fn new(view: Arc<ViewModel>, service: ShortcutCreatorService) -> Self {
        let target = Arc::clone(&view);
        let pump = forward_events(service.subscribe(), move |event| match event {
            ServiceEvent::TaskStarted { .. } => target.start(),
            ServiceEvent::ProgressUpdated { percent, .. } => target.set_progress(percent),
            ServiceEvent::TaskCompleted {
                success: true,
                result,
                ..
            } => {
                let count = result.as_u64().unwrap_or_default();
                target.show_message(format!("Created {count} shortcuts"));
            }
            ServiceEvent::TaskCompleted { success: false, .. } => target.show_message("Cancelled"),
            ServiceEvent::ErrorOccurred { message, .. } => target.show_error(message),
            ServiceEvent::BatchFlushed { .. } => {}
        });
        Self {
            view,
            service,
            pump,
        }
    }

    /// Validate, then start a creation task. Invalid input goes to the view.
    pub fn on_create_requested(&self, target_dir: &str, files: Vec<PathBuf>) -> Option<Task> {
        if let Err(e) = self.service.validate_input(target_dir, &files) {
            tracing::debug!(error = %e, "Rejected shortcut request");
            self.view.show_error(e.to_string());
            return None;
        }
        Some(self.service.create_shortcuts(target_dir, files))
    }

    pub fn on_cancel_requested(&self) {
        self.service.cancel_all();
    }
}

impl Drop for ShortcutCreatorController {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
