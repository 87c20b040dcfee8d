//! AES-256-GCM engine (authenticated)

use super::{CipherEngine, SecurityLevel, IV_LEN};
use crate::crypto::SECRET_LEN;
use crate::{Result, TandemError};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};

/// Standard engine: confidentiality and integrity.
pub struct AesGcmEngine;

impl AesGcmEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AesGcmEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CipherEngine for AesGcmEngine {
    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Authenticated
    }

    fn seal(&self, key: &[u8; SECRET_LEN], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

        cipher
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|e| TandemError::Encryption(format!("AES-GCM encryption failed: {}", e)))
    }

    fn open(&self, key: &[u8; SECRET_LEN], iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

        // A failed tag check is the only signal of a wrong key or tampering
        cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| TandemError::Decryption("authentication tag mismatch".to_string()))
    }
}
