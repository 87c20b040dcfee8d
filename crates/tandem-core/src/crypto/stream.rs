//! Keyed stream cipher for platforms without a working AEAD
//!
//! Keystream blocks are SHA-256(key || iv || counter) XORed over the
//! payload. This hides content from casual inspection only. There is no
//! authentication: a wrong key or a flipped bit yields garbage, not an error.

use super::{CipherEngine, SecurityLevel, IV_LEN};
use crate::crypto::SECRET_LEN;
use crate::Result;
use sha2::{Digest, Sha256};
use tracing::debug;

const BLOCK_LEN: usize = 32;

pub struct KeystreamEngine;

impl KeystreamEngine {
    pub fn new() -> Self {
        Self
    }

    fn apply(&self, key: &[u8; SECRET_LEN], iv: &[u8; IV_LEN], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());

        for (counter, chunk) in data.chunks(BLOCK_LEN).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(key);
            hasher.update(iv);
            hasher.update((counter as u64).to_be_bytes());
            let block = hasher.finalize();

            out.extend(chunk.iter().zip(block.iter()).map(|(b, k)| b ^ k));
        }

        out
    }
}

impl Default for KeystreamEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CipherEngine for KeystreamEngine {
    fn name(&self) -> &'static str {
        "sha256-keystream"
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::ObfuscationOnly
    }

    fn seal(&self, key: &[u8; SECRET_LEN], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
        debug!(engine = self.name(), integrity = false, "Sealing with degraded cipher");
        Ok(self.apply(key, iv, plaintext))
    }

    fn open(&self, key: &[u8; SECRET_LEN], iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
        debug!(engine = self.name(), integrity = false, "Opening with degraded cipher");
        Ok(self.apply(key, iv, ciphertext))
    }
}
