use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::ConfigStore;
use crate::error::ConfigError;
use crate::plugins::encryptor::cipher::SecureEncryptor;
use crate::plugins::encryptor::task::{DecryptTask, EncryptTask};
use crate::service::{BatchConfig, BatchingService, ServiceEvent, TaskService};
use crate::worker::{Executor, Task};

const INTERVAL_KEY: &str = "/plugins/encryptor/interval";
const MAX_LOAD_KEY: &str = "/plugins/encryptor/max_load";

/// Batches encryption requests onto the compute pool.
#[derive(Clone)]
pub struct EncryptorService {
    batch: BatchingService,
    cipher: SecureEncryptor,
}

impl EncryptorService {
    pub fn spawn(
        executor: Arc<dyn Executor>,
        config: BatchConfig,
        cipher: SecureEncryptor,
    ) -> Self {
        Self {
            batch: BatchingService::spawn("EncryptorService", executor, config),
            cipher,
        }
    }

    /// Batch limits from `/plugins/encryptor`. Missing keys fall back to
    /// defaults; present but invalid keys are an error.
    pub fn batch_config(store: &ConfigStore) -> Result<BatchConfig, ConfigError> {
        let defaults = BatchConfig::default();
        let interval = match store.get(INTERVAL_KEY) {
            Some(_) => Duration::from_millis(store.get_as::<u64>(INTERVAL_KEY)?),
            None => defaults.interval,
        };
        let max_batch_size = match store.get(MAX_LOAD_KEY) {
            Some(_) => store.get_as::<usize>(MAX_LOAD_KEY)?,
            None => defaults.max_batch_size,
        };
        Ok(BatchConfig {
            max_batch_size,
            interval,
        })
    }

    pub fn encrypt_string(&self, password: &str, data: &str) -> Task {
        let task = Task::new("EncryptTask", EncryptTask::new(self.cipher, password, data));
        self.batch.deliver(task.clone());
        task
    }

    pub fn decrypt_string(&self, password: &str, token: &str) -> Task {
        let task = Task::new("DecryptTask", DecryptTask::new(self.cipher, password, token));
        self.batch.deliver(task.clone());
        task
    }

    pub fn batching(&self) -> &BatchingService {
        &self.batch
    }

    pub async fn shutdown(&self) {
        self.batch.shutdown().await;
    }
}

impl TaskService for EncryptorService {
    fn name(&self) -> &str {
        self.batch.name()
    }

    fn deliver(&self, task: Task) {
        self.batch.deliver(task);
    }

    fn cancel_task(&self, task: &Task) {
        TaskService::cancel_task(&self.batch, task);
    }

    fn cancel_all(&self) {
        TaskService::cancel_all(&self.batch);
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.batch.subscribe()
    }
}
