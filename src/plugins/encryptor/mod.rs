//! String encryption plugin: batched password-based encrypt/decrypt.

pub mod cipher;
pub mod controller;
pub mod service;
pub mod task;

pub use cipher::SecureEncryptor;
pub use controller::EncryptorController;
pub use service::EncryptorService;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PluginError;
use crate::plugin::{Menu, Plugin, PluginContext, View, ViewModel};

pub const PLUGIN_NAME: &str = "encryptor";

pub struct EncryptorPlugin {
    view: Arc<ViewModel>,
    service: EncryptorService,
    controller: EncryptorController,
}

impl EncryptorPlugin {
    pub fn new(service: EncryptorService) -> Self {
        let view = Arc::new(ViewModel::new("Encryptor"));
        let controller = EncryptorController::new(Arc::clone(&view), service.clone());
        Self {
            view,
            service,
            controller,
        }
    }

    pub fn controller(&self) -> &EncryptorController {
        &self.controller
    }
}

/// Registry factory.
pub fn create(ctx: &PluginContext) -> Result<Box<dyn Plugin>, PluginError> {
    let config =
        EncryptorService::batch_config(&ctx.config).map_err(|source| PluginError::Config {
            name: PLUGIN_NAME.to_string(),
            source,
        })?;
    let service = EncryptorService::spawn(
        Arc::new(ctx.compute.clone()),
        config,
        SecureEncryptor::default(),
    );
    Ok(Box::new(EncryptorPlugin::new(service)))
}

#[async_trait]
impl Plugin for EncryptorPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        "1.0"
    }

    fn description(&self) -> &str {
        "Encrypt and decrypt text with a password"
    }

    fn widget(&self) -> Arc<dyn View> {
        self.view.clone()
    }

    fn setup_menu(&self, menu: &mut Menu) {
        menu.add_action("Tools", "encryptor.open", "Encrypt / decrypt text");
    }

    async fn shutdown(&self) {
        self.service.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::service::BatchConfig;
    use crate::worker::{TaskState, WorkerPool};

    fn plugin(max_batch_size: usize) -> EncryptorPlugin {
        let service = EncryptorService::spawn(
            Arc::new(WorkerPool::new(2)),
            BatchConfig {
                max_batch_size,
                interval: Duration::from_millis(20),
            },
            SecureEncryptor::with_iterations(1_000),
        );
        EncryptorPlugin::new(service)
    }

    async fn settle(task: &crate::worker::Task) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !task.state().is_terminal() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn view_idle(view: &Arc<dyn View>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snap = view.snapshot();
                if !snap.busy && (snap.message.is_some() || snap.error.is_some()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn encrypt_then_decrypt_through_the_controller() {
        let plugin = plugin(4);
        let view = plugin.widget();

        let encrypt = plugin
            .controller()
            .on_encrypt_requested("pw", "hello")
            .unwrap();
        settle(&encrypt).await;
        assert_eq!(encrypt.state(), TaskState::Completed);
        let token = encrypt.result().unwrap().as_str().unwrap().to_string();

        let decrypt = plugin.controller().on_decrypt_requested("pw", &token).unwrap();
        settle(&decrypt).await;
        assert_eq!(decrypt.result().unwrap(), "hello");

        view_idle(&view).await;
        plugin.shutdown().await;
    }

    #[tokio::test]
    async fn empty_input_is_rejected_on_the_view() {
        let plugin = plugin(4);
        assert!(plugin.controller().on_encrypt_requested("", "data").is_none());
        assert!(plugin.controller().on_decrypt_requested("pw", "").is_none());
        assert!(plugin.widget().snapshot().error.is_some());
        plugin.shutdown().await;
    }

    #[tokio::test]
    async fn wrong_password_shows_error() {
        let plugin = plugin(1);
        let view = plugin.widget();

        let encrypt = plugin.controller().on_encrypt_requested("right", "x").unwrap();
        settle(&encrypt).await;
        let token = encrypt.result().unwrap().as_str().unwrap().to_string();

        let decrypt = plugin.controller().on_decrypt_requested("wrong", &token).unwrap();
        settle(&decrypt).await;
        assert_eq!(decrypt.state(), TaskState::Failed);
        assert!(decrypt.error().unwrap().starts_with("Task failed: Decryption failed"));

        tokio::time::timeout(Duration::from_secs(5), async {
            while view.snapshot().error.is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        plugin.shutdown().await;
    }
}
