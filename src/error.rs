//! Error types for taskdock.

use std::path::PathBuf;

use uuid::Uuid;

/// Top-level error type for the shell.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Crawler error: {0}")]
    Crawler(#[from] CrawlerError),

    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Configuration store errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write configuration file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Task lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {name} ({id}) already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        name: String,
        state: String,
        target: String,
    },

    #[error("Task {name} ({id}) has already been executed")]
    AlreadyExecuted { id: Uuid, name: String },
}

/// Service-level errors.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Service {name} is shut down")]
    Closed { name: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Plugin host errors.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin {name} not found")]
    NotFound { name: String },

    #[error("Plugin {name} failed to initialize: {reason}")]
    InitFailed { name: String, reason: String },

    #[error("Plugin {name} configuration error: {source}")]
    Config {
        name: String,
        source: ConfigError,
    },
}

/// Crawler plugin errors.
#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    #[error("No idle user available")]
    NoIdleUser,

    #[error("Browser launch failed for profile {profile}: {reason}")]
    LaunchFailed { profile: String, reason: String },

    #[error("Browser session {id} is closed")]
    SessionClosed { id: Uuid },
}

/// Encryption errors.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("Key derivation failed")]
    KeyDerivation,

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed: wrong password or corrupted data")]
    Decrypt,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Decrypted data is not valid UTF-8")]
    InvalidUtf8,
}

/// Result type alias for taskdock.
pub type Result<T> = std::result::Result<T, Error>;
