use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use taskdock::config::{AppSettings, ConfigStore};
use taskdock::logging::{self, LogSettings};
use taskdock::plugin::{PluginContext, PluginHost, PluginRegistry};
use taskdock::shell::Shell;
use taskdock::worker::{IoWorkerPool, WorkerPool};

/// Upper bound on waiting for in-flight compute tasks at exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("TASKDOCK_CONFIG").unwrap_or_else(|_| "./config.json".to_string());
    let (config, load_error) = ConfigStore::load_or_default(&config_path);
    let config = Arc::new(config);

    let log_settings = LogSettings::from_store(&config);
    let log_guard = logging::init(&log_settings)?;
    if let Some(e) = load_error {
        tracing::warn!(
            path = %config.path().display(),
            error = %e,
            "Using empty configuration"
        );
    }

    let settings = AppSettings::from_store(&config);
    eprintln!("{} v{}", settings.name, env!("CARGO_PKG_VERSION"));
    eprintln!("   Config: {}", config.path().display());
    eprintln!("   Log file: {}", log_guard.path().display());

    let compute = WorkerPool::new(settings.max_concurrent_tasks);
    let io = IoWorkerPool::new(settings.io_workers).context("Failed to start IO workers")?;
    tracing::info!(
        max_concurrent = compute.max_concurrent(),
        io_workers = io.num_workers(),
        "Worker pools ready"
    );

    let ctx = PluginContext::new(Arc::clone(&config), compute.clone(), io.clone());
    let host = Arc::new(PluginHost::load_plugins(&PluginRegistry::builtin(), &ctx));
    let shell = Shell::new(Arc::clone(&host), Arc::clone(&config));

    let names = shell.plugin_names();
    eprintln!("   Plugins: {}\n", names.join(", "));
    if let Some(first) = names.first() {
        shell.switch_plugin(first)?;
    }
    tracing::info!(title = %shell.title(), plugins = names.len(), "Shell ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");

    host.shutdown().await;
    compute.close();
    if !compute.wait_for_all(Some(SHUTDOWN_GRACE)).await {
        tracing::warn!(
            outstanding = compute.outstanding_count(),
            "Compute tasks still running at exit"
        );
    }
    tokio::task::spawn_blocking(move || io.shutdown())
        .await
        .context("IO worker shutdown panicked")?;

    shell.save_config()?;
    log_settings.save_to(&config, log_guard.path())?;
    config.save()?;
    tracing::info!(config = %config.path().display(), "Configuration saved");
    Ok(())
}
