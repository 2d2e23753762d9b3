//! Password-based string encryption.
//!
//! Token layout before encoding: `salt (16) || nonce (12) || ciphertext+tag`,
//! encoded as URL-safe base64. The key is derived per token from the password
//! and that token's salt.

use std::num::NonZeroU32;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use rand::Rng;
use ring::aead::{self, AES_256_GCM, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::pbkdf2;

use crate::error::CipherError;

pub const DEFAULT_ITERATIONS: u32 = 100_000;
pub const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// PBKDF2-HMAC-SHA256 key derivation feeding AES-256-GCM.
#[derive(Debug, Clone, Copy)]
pub struct SecureEncryptor {
    iterations: NonZeroU32,
}

impl Default for SecureEncryptor {
    fn default() -> Self {
        Self::with_iterations(DEFAULT_ITERATIONS)
    }
}

impl SecureEncryptor {
    /// Zero is raised to one iteration.
    pub fn with_iterations(iterations: u32) -> Self {
        Self {
            iterations: NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN),
        }
    }

    pub fn encrypt(&self, password: &str, data: &str) -> Result<String, CipherError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; aead::NONCE_LEN];
        let mut rng = rand::thread_rng();
        rng.fill(&mut salt);
        rng.fill(&mut nonce);

        let key = self.derive_key(password, &salt)?;
        let mut sealed = data.as_bytes().to_vec();
        key.seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut sealed)
            .map_err(|_| CipherError::Encrypt)?;

        let mut token = Vec::with_capacity(SALT_LEN + aead::NONCE_LEN + sealed.len());
        token.extend_from_slice(&salt);
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&sealed);
        Ok(URL_SAFE.encode(token))
    }

    pub fn decrypt(&self, password: &str, token: &str) -> Result<String, CipherError> {
        let raw = URL_SAFE
            .decode(token.trim())
            .map_err(|e| CipherError::MalformedToken(e.to_string()))?;
        let min_len = SALT_LEN + aead::NONCE_LEN + AES_256_GCM.tag_len();
        if raw.len() < min_len {
            return Err(CipherError::MalformedToken(format!(
                "expected at least {min_len} bytes, got {}",
                raw.len()
            )));
        }

        let (salt, rest) = raw.split_at(SALT_LEN);
        let (nonce, sealed) = rest.split_at(aead::NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce)
            .map_err(|_| CipherError::MalformedToken("bad nonce".into()))?;

        let key = self.derive_key(password, salt)?;
        let mut buf = sealed.to_vec();
        let plain = key
            .open_in_place(nonce, Aad::empty(), &mut buf)
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plain.to_vec()).map_err(|_| CipherError::InvalidUtf8)
    }

    fn derive_key(&self, password: &str, salt: &[u8]) -> Result<LessSafeKey, CipherError> {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            salt,
            password.as_bytes(),
            &mut key,
        );
        let key = UnboundKey::new(&AES_256_GCM, &key).map_err(|_| CipherError::KeyDerivation)?;
        Ok(LessSafeKey::new(key))
    }
}
