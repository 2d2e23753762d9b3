//! Shared dependencies handed to plugin factories.

use std::sync::Arc;

use crate::config::ConfigStore;
use crate::plugins::crawler::BrowserDriver;
use crate::worker::{IoWorkerPool, WorkerPool};

/// Injected into every plugin factory.
#[derive(Clone)]
pub struct PluginContext {
    pub config: Arc<ConfigStore>,
    /// Bounded pool for blocking work.
    pub compute: WorkerPool,
    /// Event loops for long-running IO work.
    pub io: IoWorkerPool,
    /// Browser automation backend, when one is available.
    pub browser: Option<Arc<dyn BrowserDriver>>,
}

impl PluginContext {
    pub fn new(config: Arc<ConfigStore>, compute: WorkerPool, io: IoWorkerPool) -> Self {
        Self {
            config,
            compute,
            io,
            browser: None,
        }
    }

    pub fn with_browser_driver(mut self, driver: Arc<dyn BrowserDriver>) -> Self {
        self.browser = Some(driver);
        self
    }
}
