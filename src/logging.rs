//! Tracing setup: console plus a per-run log file.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::ConfigStore;
use crate::error::{ConfigError, Error};

/// Logger settings read from the `/log` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Directory for new log files.
    pub log_dir: PathBuf,
    /// Existing log file to keep appending to.
    pub log_file: Option<PathBuf>,
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Prefix each line with the emitting module.
    pub use_module_tag: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_file: None,
            level: "info".to_string(),
            use_module_tag: true,
        }
    }
}

impl LogSettings {
    pub fn from_store(store: &ConfigStore) -> Self {
        let defaults = Self::default();
        Self {
            log_dir: store.get_or("/log/log_dir", defaults.log_dir),
            log_file: store.get_or("/log/log_file", defaults.log_file),
            level: store.get_or("/log/level", defaults.level),
            use_module_tag: store.get_or("/log/use_module_tag", defaults.use_module_tag),
        }
    }

    /// Pick the file to log into.
    ///
    /// A configured `log_file` that still exists is reused; otherwise a new
    /// timestamped file is placed in `log_dir`.
    pub fn resolve_log_path(&self) -> std::io::Result<PathBuf> {
        if let Some(file) = &self.log_file
            && file.exists()
        {
            return Ok(file.clone());
        }
        fs::create_dir_all(&self.log_dir)?;
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        Ok(self.log_dir.join(format!("{stamp}.log")))
    }

    /// Record the effective settings so the next run appends to the same file.
    pub fn save_to(&self, store: &ConfigStore, active_file: &Path) -> Result<(), ConfigError> {
        store.set("/log/log_dir", &self.log_dir)?;
        store.set("/log/log_file", active_file)?;
        store.set("/log/level", &self.level)?;
        store.set("/log/use_module_tag", self.use_module_tag)?;
        Ok(())
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Keeps the file writer alive; dropping it flushes buffered lines.
pub struct LogGuard {
    path: PathBuf,
    _guard: WorkerGuard,
}

impl LogGuard {
    /// Path of the active log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Install the global subscriber.
pub fn init(settings: &LogSettings) -> Result<LogGuard, Error> {
    let path = settings
        .resolve_log_path()
        .map_err(|e| Error::Logging(format!("cannot prepare log directory: {e}")))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| Error::Logging(format!("cannot open {}: {e}", path.display())))?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::registry()
        .with(settings.filter())
        .with(fmt::layer().with_target(settings.use_module_tag))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(settings.use_module_tag)
                .with_writer(writer),
        )
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    tracing::info!(file = %path.display(), "Logging initialized");
    Ok(LogGuard {
        path,
        _guard: guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_from_store() {
        let store = ConfigStore::from_value(
            "unused.json",
            json!({ "log": { "log_dir": "var/log", "level": "debug", "use_module_tag": false } }),
        );
        let settings = LogSettings::from_store(&store);
        assert_eq!(settings.log_dir, PathBuf::from("var/log"));
        assert_eq!(settings.level, "debug");
        assert!(!settings.use_module_tag);
        assert!(settings.log_file.is_none());
    }

    #[test]
    fn reuses_existing_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("kept.log");
        std::fs::write(&existing, "").unwrap();
        let settings = LogSettings {
            log_dir: dir.path().join("other"),
            log_file: Some(existing.clone()),
            ..Default::default()
        };
        assert_eq!(settings.resolve_log_path().unwrap(), existing);
    }

    #[test]
    fn new_log_file_goes_into_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings {
            log_dir: dir.path().join("logs"),
            log_file: Some(dir.path().join("gone.log")),
            ..Default::default()
        };
        let path = settings.resolve_log_path().unwrap();
        assert_eq!(path.parent(), Some(settings.log_dir.as_path()));
        assert!(path.extension().is_some_and(|e| e == "log"));
    }

    #[test]
    fn save_round_trips_through_store() {
        let store = ConfigStore::from_value("unused.json", json!({}));
        let settings = LogSettings::default();
        settings.save_to(&store, Path::new("logs/run.log")).unwrap();
        assert_eq!(store.get("/log/log_file"), Some(json!("logs/run.log")));
        assert_eq!(LogSettings::from_store(&store).level, "info");
    }
}
