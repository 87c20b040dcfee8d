use super::{generate_iv, probe_engine, CipherEngine, CoupleSecret, SecurityLevel, IV_LEN};
use crate::{Result, TandemError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tandem_types::{EncryptedEnvelope, MessageContent};
use tracing::warn;

/// Turns message content into an encrypted envelope and back.
///
/// Stateless apart from the engine choice; cheap to clone and share.
#[derive(Clone)]
pub struct CipherService {
    engine: Arc<dyn CipherEngine>,
}

impl CipherService {
    pub fn new(engine: Arc<dyn CipherEngine>) -> Self {
        if !engine.security_level().has_integrity() {
            warn!(
                engine = engine.name(),
                integrity = false,
                "Cipher service running without integrity protection"
            );
        }
        Self { engine }
    }

    /// Service backed by the best engine this process supports.
    pub fn probe() -> Self {
        Self::new(probe_engine())
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.engine.security_level()
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Encrypt content under the couple secret with a fresh IV.
    pub fn encrypt(&self, content: &MessageContent, secret: &CoupleSecret) -> Result<EncryptedEnvelope> {
        let plaintext = serde_json::to_vec(content)?;
        let iv = generate_iv()?;
        let ciphertext = self.engine.seal(secret.key(), &iv, &plaintext)?;

        Ok(EncryptedEnvelope {
            ciphertext: STANDARD.encode(ciphertext),
            iv: STANDARD.encode(iv),
        })
    }

    /// Decrypt an envelope. Every failure, including malformed encodings and
    /// unparseable plaintext, is reported as a decryption error.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope, secret: &CoupleSecret) -> Result<MessageContent> {
        let iv_bytes = STANDARD
            .decode(&envelope.iv)
            .map_err(|e| TandemError::Decryption(format!("invalid iv encoding: {}", e)))?;
        let iv: [u8; IV_LEN] = iv_bytes.as_slice().try_into().map_err(|_| {
            TandemError::Decryption(format!(
                "iv must be {} bytes, got {}",
                IV_LEN,
                iv_bytes.len()
            ))
        })?;

        let ciphertext = STANDARD
            .decode(&envelope.ciphertext)
            .map_err(|e| TandemError::Decryption(format!("invalid ciphertext encoding: {}", e)))?;

        let plaintext = self.engine.open(secret.key(), &iv, &ciphertext)?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| TandemError::Decryption(format!("plaintext is not valid content: {}", e)))
    }
}

impl Default for CipherService {
    fn default() -> Self {
        Self::probe()
    }
}

impl std::fmt::Debug for CipherService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherService")
            .field("engine", &self.engine.name())
            .finish()
    }
}
