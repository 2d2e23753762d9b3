use serde_json::{Value, json};

use crate::plugins::encryptor::cipher::SecureEncryptor;
use crate::worker::{Execute, TaskContext};

/// Encrypt one string; the result is the token.
pub struct EncryptTask {
    cipher: SecureEncryptor,
    password: String,
    data: String,
}

impl EncryptTask {
    pub fn new(
        cipher: SecureEncryptor,
        password: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            cipher,
            password: password.into(),
            data: data.into(),
        }
    }
}

impl Execute for EncryptTask {
    fn execute(&mut self, _ctx: &TaskContext) -> anyhow::Result<Value> {
        let token = self.cipher.encrypt(&self.password, &self.data)?;
        Ok(json!(token))
    }
}

/// Decrypt one token; the result is the plaintext.
pub struct DecryptTask {
    cipher: SecureEncryptor,
    password: String,
    token: String,
}

impl DecryptTask {
    pub fn new(
        cipher: SecureEncryptor,
        password: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            cipher,
            password: password.into(),
            token: token.into(),
        }
    }
}

impl Execute for DecryptTask {
    fn execute(&mut self, _ctx: &TaskContext) -> anyhow::Result<Value> {
        let plain = self.cipher.decrypt(&self.password, &self.token)?;
        Ok(json!(plain))
    }
}
