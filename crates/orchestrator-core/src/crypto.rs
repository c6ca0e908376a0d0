//! Provider-credential encryption.
//!
//! Per-tenant provider API keys are encrypted at rest with AES-256-GCM. The
//! installation-wide key-encryption key is `SHA-256(API_KEY_ENCRYPTION_SECRET)`
//! (32 bytes, used directly as the AES-256 key). Ciphertext is stored as
//! `iv:authTag:ciphertext`, each hex-encoded, so a row is self-contained for
//! decryption without needing to know the nonce/tag split up front.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::ProviderError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub struct KeyEncryptionKey([u8; 32]);

impl KeyEncryptionKey {
    pub fn derive(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, ProviderError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let combined = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| ProviderError::DecryptionFailed(e.to_string()))?;
        let (ciphertext, tag) = combined.split_at(combined.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce_bytes),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    /// Decrypt a `iv:authTag:ciphertext` hex triple. Never panics on
    /// malformed or tampered input — always a `ProviderError::DecryptionFailed`.
    pub fn decrypt(&self, encoded: &str) -> Result<String, ProviderError> {
        let mut parts = encoded.splitn(3, ':');
        let (iv_hex, tag_hex, ciphertext_hex) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => return Err(ProviderError::DecryptionFailed("malformed ciphertext format".to_string())),
        };

        let iv = hex::decode(iv_hex).map_err(|e| ProviderError::DecryptionFailed(e.to_string()))?;
        let tag = hex::decode(tag_hex).map_err(|e| ProviderError::DecryptionFailed(e.to_string()))?;
        let ciphertext = hex::decode(ciphertext_hex).map_err(|e| ProviderError::DecryptionFailed(e.to_string()))?;

        if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(ProviderError::DecryptionFailed("invalid iv/tag length".to_string()));
        }

        let mut combined = ciphertext;
        combined.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let nonce = Nonce::from_slice(&iv);
        let plaintext = cipher
            .decrypt(nonce, combined.as_slice())
            .map_err(|e| ProviderError::DecryptionFailed(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| ProviderError::DecryptionFailed(e.to_string()))
    }
}
