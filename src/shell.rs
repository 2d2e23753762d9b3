//! Headless main window: plugin list, current plugin, menu bar.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::ConfigStore;
use crate::error::{ConfigError, PluginError};
use crate::plugin::{Menu, MenuAction, PluginHost, View};

const RECENT_FILES_KEY: &str = "/ui_settings/recent_files";
const GEOMETRY_KEY: &str = "/window_geometry";
const MAX_RECENT_FILES: usize = 10;

/// Window position and size, persisted under `/window_geometry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowGeometry {
    fn default() -> Self {
        Self {
            x: 100,
            y: 100,
            width: 1024,
            height: 768,
        }
    }
}

#[derive(Default)]
struct ShellState {
    current: Option<String>,
    widgets: HashMap<String, Arc<dyn View>>,
    geometry: WindowGeometry,
}

pub struct Shell {
    host: Arc<PluginHost>,
    config: Arc<ConfigStore>,
    state: Mutex<ShellState>,
}

impl Shell {
    pub fn new(host: Arc<PluginHost>, config: Arc<ConfigStore>) -> Self {
        let geometry = config.get_or(GEOMETRY_KEY, WindowGeometry::default());
        Self {
            host,
            config,
            state: Mutex::new(ShellState {
                geometry,
                ..ShellState::default()
            }),
        }
    }

    /// `<app name> v<version>`.
    pub fn title(&self) -> String {
        let name = self.config.get_or("/app/name", "taskdock".to_string());
        format!("{name} v{}", env!("CARGO_PKG_VERSION"))
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.host.plugin_names()
    }

    pub fn current_plugin(&self) -> Option<String> {
        self.lock().current.clone()
    }

    /// Show `name`'s view. Views are created once and cached.
    pub fn switch_plugin(&self, name: &str) -> Result<Arc<dyn View>, PluginError> {
        let mut state = self.lock();
        if state.current.as_deref() == Some(name)
            && let Some(view) = state.widgets.get(name)
        {
            return Ok(Arc::clone(view));
        }

        let plugin = self.host.get_plugin(name).inspect_err(|e| {
            tracing::error!("{e}");
        })?;
        let view = Arc::clone(
            state
                .widgets
                .entry(name.to_string())
                .or_insert_with(|| plugin.widget()),
        );

        let previous = state.current.replace(name.to_string());
        tracing::info!(
            from = previous.as_deref().unwrap_or("none"),
            to = name,
            "Switched plugin"
        );
        Ok(view)
    }

    /// File menu with recent files, then every plugin's entries.
    pub fn menu(&self) -> Menu {
        let mut menu = Menu::new();
        let recent: Vec<String> = self.config.get_or(RECENT_FILES_KEY, Vec::new());
        let file = menu.submenu("File");
        for path in recent {
            file.actions.push(MenuAction {
                id: format!("recent:{path}"),
                label: path,
            });
        }
        for plugin in self.host.plugins() {
            plugin.setup_menu(&mut menu);
        }
        menu.submenu("Options");
        menu
    }

    /// Put `path` first in the recent files list.
    pub fn add_recent_file(&self, path: &str) -> Result<(), ConfigError> {
        let mut recent: Vec<String> = self.config.get_or(RECENT_FILES_KEY, Vec::new());
        recent.retain(|p| p != path);
        recent.insert(0, path.to_string());
        recent.truncate(MAX_RECENT_FILES);
        self.config.set(RECENT_FILES_KEY, recent)
    }

    pub fn geometry(&self) -> WindowGeometry {
        self.lock().geometry
    }

    pub fn set_geometry(&self, geometry: WindowGeometry) {
        self.lock().geometry = geometry;
    }

    /// Write window state back to the config store. Does not save the file.
    pub fn save_config(&self) -> Result<(), ConfigError> {
        self.config.set(GEOMETRY_KEY, self.geometry())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ShellState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
