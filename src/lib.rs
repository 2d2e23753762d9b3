//! taskdock: plugin shell with cancellable background task dispatch.

pub mod config;
pub mod error;
pub mod logging;
pub mod plugin;
pub mod plugins;
pub mod service;
pub mod shell;
pub mod worker;
