use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::plugin::ViewModel;
use crate::plugins::encryptor::service::EncryptorService;
use crate::plugins::forward_events;
use crate::service::{ServiceEvent, TaskService};
use crate::worker::Task;

/// Validates view input, forwards it to the service, shows outcomes.
pub struct EncryptorController {
    view: Arc<ViewModel>,
    service: EncryptorService,
    pump: JoinHandle<()>,
}

impl EncryptorController {
    pub fn new(view: Arc<ViewModel>, service: EncryptorService) -> Self {
        let target = Arc::clone(&view);
        let pump = forward_events(service.subscribe(), move |event| match event {
            ServiceEvent::TaskStarted { .. } => target.start(),
            ServiceEvent::TaskCompleted { result, .. } => target.show_message(render(&result)),
            ServiceEvent::ErrorOccurred { message, .. } => target.show_error(message),
            ServiceEvent::ProgressUpdated { .. } | ServiceEvent::BatchFlushed { .. } => {}
        });
        Self {
            view,
            service,
            pump,
        }
    }

    pub fn on_encrypt_requested(&self, password: &str, data: &str) -> Option<Task> {
        if password.is_empty() || data.is_empty() {
            self.view.show_error("Please enter a password and data");
            return None;
        }
        Some(self.service.encrypt_string(password, data))
    }

    pub fn on_decrypt_requested(&self, password: &str, token: &str) -> Option<Task> {
        if password.is_empty() || token.is_empty() {
            self.view.show_error("Please enter a password and encrypted data");
            return None;
        }
        Some(self.service.decrypt_string(password, token))
    }
}

impl Drop for EncryptorController {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn render(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
