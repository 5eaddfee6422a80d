//! AES-256-GCM sealing of tokens at rest.
//!
//! A sealed token is `base64(nonce || ciphertext)`, so each column holds one
//! self-contained value. Every seal draws a fresh 96-bit nonce.

use crate::error::StoreError;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// Cipher bound to the master key for the lifetime of a store.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Builds a cipher from a base64-encoded 32-byte master key.
    pub fn from_base64_key(key_base64: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key_base64.trim())
            .context("Failed to decode base64 encryption key")?;

        if key_bytes.len() != KEY_SIZE {
            return Err(anyhow!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key_bytes.len()
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        Ok(Self { cipher })
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, StoreError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| StoreError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Reverses [`TokenCipher::seal`]. Fails on a wrong key or tampered data.
    pub fn open(&self, sealed: &str) -> Result<String, StoreError> {
        let bytes = BASE64
            .decode(sealed)
            .map_err(|e| StoreError::Encryption(format!("invalid base64: {}", e)))?;

        if bytes.len() <= NONCE_SIZE {
            return Err(StoreError::Encryption(format!(
                "sealed token too short: {} bytes",
                bytes.len()
            )));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                StoreError::Encryption("decryption failed (wrong key or corrupted data)".into())
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| StoreError::Encryption("decrypted token is not valid UTF-8".into()))
    }
}
