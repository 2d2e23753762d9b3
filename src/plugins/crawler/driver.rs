//! Browser automation seam.
//!
//! The crawler never talks to a browser directly; a backend implements these
//! traits and is handed to the plugin through the context.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ConfigStore;

/// `/crawler/browser` settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    #[serde(rename = "type")]
    pub browser_type: String,
    pub headless: bool,
    pub args: Vec<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            browser_type: "chromium".to_string(),
            headless: true,
            args: Vec::new(),
        }
    }
}

impl BrowserOptions {
    pub fn from_store(store: &ConfigStore) -> Self {
        store.get_or("/crawler/browser", Self::default())
    }
}

/// Launches browsers with a persistent profile directory.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch_persistent_context(
        &self,
        profile_dir: &Path,
        options: &BrowserOptions,
    ) -> anyhow::Result<Box<dyn BrowserContext>>;
}

/// A running browser with one profile.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn new_page(&self) -> anyhow::Result<Box<dyn BrowserPage>>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// One tab.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> anyhow::Result<()>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> anyhow::Result<String>;
}
