//! Plugins shipped with the shell.

pub mod crawler;
pub mod encryptor;
pub mod shortcut;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::service::ServiceEvent;

/// Feed service events to a controller callback until the service closes.
pub(crate) fn forward_events<F>(
    mut rx: broadcast::Receiver<ServiceEvent>,
    mut on_event: F,
) -> JoinHandle<()>
where
    F: FnMut(ServiceEvent) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => on_event(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Controller lagged behind service events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
