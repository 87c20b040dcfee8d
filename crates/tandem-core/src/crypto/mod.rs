//! Symmetric encryption for couple messages
//!
//! AES-256-GCM is the standard engine. A keystream engine without
//! integrity protection stands in only where AES-GCM fails its self-test.

mod aes;
mod secret;
mod service;
mod stream;

pub use aes::AesGcmEngine;
pub use secret::{
    generate_secret, generate_secret_with_source, hash_secret, verify_secret, CoupleSecret,
    SecretSource, SECRET_LEN,
};
pub use service::CipherService;
pub use stream::KeystreamEngine;

use crate::Result;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, warn};

/// IV length in bytes for every engine
pub const IV_LEN: usize = 12;

/// Protection actually provided by the active engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    /// Confidentiality plus tamper detection
    Authenticated,
    /// Content is hidden, tampering and wrong keys go undetected
    ObfuscationOnly,
}

impl SecurityLevel {
    pub fn has_integrity(&self) -> bool {
        matches!(self, SecurityLevel::Authenticated)
    }
}

/// Cipher engine trait. One engine is picked per process.
pub trait CipherEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn security_level(&self) -> SecurityLevel;

    /// Encrypt `plaintext` under `key` with the given IV
    fn seal(&self, key: &[u8; SECRET_LEN], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt `ciphertext`. Authenticated engines fail on a bad tag.
    fn open(&self, key: &[u8; SECRET_LEN], iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Fresh random IV from the OS source
pub fn generate_iv() -> Result<[u8; IV_LEN]> {
    iv_from(&mut OsRng)
}

/// An IV is never derived from a weak source; a failing RNG is an error.
fn iv_from<R: RngCore>(rng: &mut R) -> Result<[u8; IV_LEN]> {
    let mut iv = [0u8; IV_LEN];
    rng.try_fill_bytes(&mut iv)
        .map_err(|e| crate::TandemError::Encryption(format!("random source unavailable: {}", e)))?;
    Ok(iv)
}

/// Pick the engine for this process.
///
/// AES-GCM is used when a seal/open round trip succeeds. Otherwise the
/// degraded keystream engine is selected and a warning is emitted.
pub fn probe_engine() -> Arc<dyn CipherEngine> {
    let aes = AesGcmEngine::new();

    match self_test(&aes) {
        Ok(()) => {
            debug!(engine = aes.name(), "Cipher engine selected");
            Arc::new(aes)
        }
        Err(e) => {
            let fallback = KeystreamEngine::new();
            warn!(
                engine = fallback.name(),
                integrity = false,
                "AES-GCM unavailable ({}), messages will be obfuscated without integrity protection",
                e
            );
            Arc::new(fallback)
        }
    }
}

fn self_test(engine: &dyn CipherEngine) -> Result<()> {
    let key = [0x5au8; SECRET_LEN];
    let iv = generate_iv()?;
    let probe = b"tandem-self-test";

    let sealed = engine.seal(&key, &iv, probe)?;
    let opened = engine.open(&key, &iv, &sealed)?;

    if opened.as_slice() == probe {
        Ok(())
    } else {
        Err(crate::TandemError::Encryption(
            "self-test round trip mismatch".to_string(),
        ))
    }
}
