//! Configuration store and typed settings.
//!
//! The store is a single JSON document loaded once at startup and written
//! back on explicit save. Lookups use JSON pointers
//! (`/plugins/encryptor/interval`). Reads and writes may come from any
//! thread; a lock guards the in-memory document and the last save wins.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// File-backed JSON configuration document.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    doc: RwLock<Value>,
}

impl ConfigStore {
    /// Load the document at `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let doc: Value = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(Self::from_value(path, doc))
    }

    /// Load the document at `path`, falling back to an empty document.
    ///
    /// The load error is handed back so the caller can report it once logging
    /// is up. The store still saves to `path`.
    pub fn load_or_default(path: impl Into<PathBuf>) -> (Self, Option<ConfigError>) {
        let path = path.into();
        match Self::load(&path) {
            Ok(store) => (store, None),
            Err(e) => (Self::from_value(path, Value::Object(Map::new())), Some(e)),
        }
    }

    /// Build a store from an in-memory document.
    pub fn from_value(path: impl Into<PathBuf>, doc: Value) -> Self {
        Self {
            path: path.into(),
            doc: RwLock::new(doc),
        }
    }

    /// Path the store saves to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a value by JSON pointer.
    pub fn get(&self, pointer: &str) -> Option<Value> {
        let doc = self.doc.read().unwrap_or_else(PoisonError::into_inner);
        doc.pointer(pointer).cloned()
    }

    /// Look up and deserialize a required value.
    pub fn get_as<T: DeserializeOwned>(&self, pointer: &str) -> Result<T, ConfigError> {
        let value = self.get(pointer).ok_or_else(|| ConfigError::MissingRequired {
            key: pointer.to_string(),
        })?;
        serde_json::from_value(value).map_err(|e| ConfigError::InvalidValue {
            key: pointer.to_string(),
            message: e.to_string(),
        })
    }

    /// Look up an optional value, using `default` when absent or invalid.
    pub fn get_or<T: DeserializeOwned>(&self, pointer: &str, default: T) -> T {
        match self.get_as(pointer) {
            Ok(value) => value,
            Err(ConfigError::MissingRequired { .. }) => default,
            Err(e) => {
                tracing::warn!(key = pointer, error = %e, "Ignoring invalid configuration value");
                default
            }
        }
    }

    /// Set a value by JSON pointer, creating intermediate objects.
    pub fn set<T: Serialize>(&self, pointer: &str, value: T) -> Result<(), ConfigError> {
        let value = serde_json::to_value(value)?;
        let mut doc = self.doc.write().unwrap_or_else(PoisonError::into_inner);

        let mut node = &mut *doc;
        for token in pointer_tokens(pointer) {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            let Value::Object(map) = node else {
                unreachable!("node was just made an object");
            };
            node = map.entry(token).or_insert(Value::Null);
        }
        *node = value;
        Ok(())
    }

    /// Snapshot of the whole document.
    pub fn snapshot(&self) -> Value {
        self.doc
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Write the document back to its file (4-space indent).
    pub fn save(&self) -> Result<(), ConfigError> {
        let doc = self.snapshot();
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        doc.serialize(&mut ser)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        fs::write(&self.path, buf).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })?;

        tracing::info!(path = %self.path.display(), "Configuration saved");
        Ok(())
    }
}

/// Split a JSON pointer into unescaped reference tokens.
fn pointer_tokens(pointer: &str) -> impl Iterator<Item = String> + '_ {
    pointer
        .split('/')
        .skip(1)
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
}

/// Shell-wide settings read from the `/app` section.
#[derive(Debug, Clone)]
pub struct AppSettings {
    /// Application name, used in logs.
    pub name: String,
    /// Maximum concurrently executing compute tasks.
    pub max_concurrent_tasks: usize,
    /// Number of dedicated IO event-loop threads.
    pub io_workers: usize,
    /// Root directory holding per-plugin resource folders.
    pub plugin_root: PathBuf,
    /// Plugins that should not be instantiated.
    pub disabled_plugins: Vec<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "taskdock".to_string(),
            max_concurrent_tasks: 4,
            io_workers: 1,
            plugin_root: PathBuf::from("plugins"),
            disabled_plugins: Vec::new(),
        }
    }
}

impl AppSettings {
    /// Read settings from the store, defaulting missing keys.
    pub fn from_store(store: &ConfigStore) -> Self {
        let defaults = Self::default();
        Self {
            name: store.get_or("/app/name", defaults.name),
            max_concurrent_tasks: store
                .get_or("/app/max_concurrent_tasks", defaults.max_concurrent_tasks)
                .max(1),
            io_workers: store.get_or("/app/io_workers", defaults.io_workers).max(1),
            plugin_root: store.get_or("/app/plugin_root", defaults.plugin_root),
            disabled_plugins: store.get_or("/app/disabled_plugins", defaults.disabled_plugins),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ConfigStore {
        ConfigStore::from_value(
            "unused.json",
            json!({
                "plugins": { "encryptor": { "interval": 500, "max_load": 3 } },
                "app": { "max_concurrent_tasks": 0, "io_workers": "two" }
            }),
        )
    }

    #[test]
    fn pointer_lookup() {
        let store = store();
        assert_eq!(store.get("/plugins/encryptor/interval"), Some(json!(500)));
        assert!(store.get("/plugins/missing").is_none());
        let max: usize = store.get_as("/plugins/encryptor/max_load").unwrap();
        assert_eq!(max, 3);
    }

    #[test]
    fn missing_and_invalid_values() {
        let store = store();
        assert!(matches!(
            store.get_as::<u64>("/nope"),
            Err(ConfigError::MissingRequired { .. })
        ));
        assert!(matches!(
            store.get_as::<u64>("/app/io_workers"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(store.get_or("/app/io_workers", 7usize), 7);
    }

    #[test]
    fn app_settings_clamp_and_default() {
        let settings = AppSettings::from_store(&store());
        assert_eq!(settings.max_concurrent_tasks, 1);
        assert_eq!(settings.io_workers, 1);
        assert_eq!(settings.name, "taskdock");
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let store = store();
        store.set("/log/formatter/datefmt", "%H:%M").unwrap();
        assert_eq!(store.get("/log/formatter/datefmt"), Some(json!("%H:%M")));
        store.set("/plugins/encryptor/interval/ms", 10).unwrap();
        assert_eq!(store.get("/plugins/encryptor/interval/ms"), Some(json!(10)));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = ConfigStore::from_value(&path, json!({ "a": { "b": [1, 2] } }));
        store.set("/a/c", true).unwrap();
        store.save().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("    \"a\""));

        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.get("/a/c"), Some(json!(true)));
        assert_eq!(reloaded.get("/a/b/1"), Some(json!(2)));
    }

    #[test]
    fn load_or_default_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let (store, error) = ConfigStore::load_or_default(&path);
        assert_eq!(store.snapshot(), json!({}));
        assert_eq!(store.path(), path.as_path());
        assert!(matches!(error, Some(ConfigError::Read { .. })));

        std::fs::write(&path, r#"{"app": {"name": "x"}}"#).unwrap();
        let (store, error) = ConfigStore::load_or_default(&path);
        assert!(error.is_none());
        assert_eq!(store.get("/app/name"), Some(json!("x")));
    }
}
