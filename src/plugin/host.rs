//! Plugin registry and host.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AppSettings;
use crate::error::PluginError;
use crate::plugin::context::PluginContext;
use crate::plugin::Plugin;
use crate::plugins;

/// Builds one plugin instance from the shared context.
pub type PluginFactory = fn(&PluginContext) -> Result<Box<dyn Plugin>, PluginError>;

/// Compiled-in map of plugin name to factory.
#[derive(Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every plugin shipped in this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(plugins::encryptor::PLUGIN_NAME, plugins::encryptor::create);
        registry.register(plugins::shortcut::PLUGIN_NAME, plugins::shortcut::create);
        registry.register(plugins::crawler::PLUGIN_NAME, plugins::crawler::create);
        registry
    }

    /// Register a factory. A later registration replaces an earlier one.
    pub fn register(&mut self, name: impl Into<String>, factory: PluginFactory) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            tracing::warn!(plugin = %name, "Replaced plugin factory");
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// Owns the loaded plugins for the lifetime of the process.
pub struct PluginHost {
    plugin_root: PathBuf,
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl PluginHost {
    /// Instantiate every enabled plugin in `registry`, in name order.
    ///
    /// Names starting with `_` and names listed in `/app/disabled_plugins`
    /// are skipped. A factory error is logged and that plugin is left out.
    pub fn load_plugins(registry: &PluginRegistry, ctx: &PluginContext) -> Self {
        let settings = AppSettings::from_store(&ctx.config);
        let mut plugins = BTreeMap::new();

        for (name, factory) in &registry.factories {
            if name.starts_with('_') {
                tracing::debug!(plugin = %name, "Skipping private plugin");
                continue;
            }
            if settings.disabled_plugins.iter().any(|d| d == name) {
                tracing::info!(plugin = %name, "Plugin disabled by configuration");
                continue;
            }

            match factory(ctx) {
                Ok(plugin) => {
                    tracing::info!(
                        plugin = %name,
                        version = plugin.version(),
                        "Loaded plugin"
                    );
                    plugins.insert(name.clone(), Arc::from(plugin));
                }
                Err(e) => tracing::error!(plugin = %name, "Failed to load plugin: {e}"),
            }
        }

        Self {
            plugin_root: settings.plugin_root,
            plugins,
        }
    }

    /// Loaded plugin names, sorted.
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    pub fn get_plugin(&self, name: &str) -> Result<Arc<dyn Plugin>, PluginError> {
        self.plugins
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn plugins(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins.values()
    }

    pub fn plugin_root(&self) -> &Path {
        &self.plugin_root
    }

    /// `<plugin_root>/<name>/resources/<path>` for a loaded plugin.
    pub fn get_plugin_resource(&self, name: &str, path: impl AsRef<Path>) -> Option<PathBuf> {
        if !self.plugins.contains_key(name) {
            return None;
        }
        Some(self.plugin_root.join(name).join("resources").join(path))
    }

    /// Shut every plugin down, in load order.
    pub async fn shutdown(&self) {
        for (name, plugin) in &self.plugins {
            tracing::debug!(plugin = %name, "Shutting down plugin");
            plugin.shutdown().await;
        }
    }
}
