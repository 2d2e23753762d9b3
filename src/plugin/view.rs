//! Headless view models.
//!
//! A toolkit binding would render these; controllers drive them exactly as
//! they would drive widgets.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// What a view currently shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSnapshot {
    pub busy: bool,
    pub progress: u8,
    pub message: Option<String>,
    pub error: Option<String>,
}

/// Renderable plugin view.
pub trait View: Send + Sync {
    fn title(&self) -> String;

    fn snapshot(&self) -> ViewSnapshot;
}

/// Thread-safe view state shared by a plugin's view and controller.
#[derive(Debug)]
pub struct ViewModel {
    title: String,
    state: Mutex<ViewSnapshot>,
}

impl ViewModel {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            state: Mutex::new(ViewSnapshot::default()),
        }
    }

    /// Enter the busy state and clear the previous outcome.
    pub fn start(&self) {
        self.update(|s| {
            s.busy = true;
            s.progress = 0;
            s.error = None;
        });
    }

    pub fn set_progress(&self, percent: u8) {
        self.update(|s| s.progress = percent.min(100));
    }

    /// Leave the busy state showing `message`.
    pub fn show_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| {
            s.busy = false;
            s.message = Some(message);
        });
    }

    /// Leave the busy state showing `error`.
    pub fn show_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.update(|s| {
            s.busy = false;
            s.error = Some(error);
        });
    }

    fn update(&self, f: impl FnOnce(&mut ViewSnapshot)) {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl View for ViewModel {
    fn title(&self) -> String {
        self.title.clone()
    }

    fn snapshot(&self) -> ViewSnapshot {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
