//! Couple secret: generation, hashing, verification

use crate::{Result, TandemError};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Key length in bytes (AES-256)
pub const SECRET_LEN: usize = 32;

/// Shared symmetric key of a couple, hex encoded.
///
/// Held only on the two paired devices. Immutable: pairing replaces it,
/// unpairing drops it.
#[derive(Clone, PartialEq, Eq)]
pub struct CoupleSecret {
    hex: String,
    key: [u8; SECRET_LEN],
}

/// Where the bytes of a freshly generated secret came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    /// Operating system CSPRNG
    Os,
    /// Time/pid seeded generator, used only when the OS source failed.
    /// Weaker; callers should surface this to the pairing flow.
    WeakFallback,
}

impl CoupleSecret {
    pub fn from_bytes(key: [u8; SECRET_LEN]) -> Self {
        Self {
            hex: hex::encode(key),
            key,
        }
    }

    /// Parse a 64 character hex string.
    pub fn from_hex(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.len() != SECRET_LEN * 2 {
            return Err(TandemError::InvalidSecret(format!(
                "expected {} hex characters, got {}",
                SECRET_LEN * 2,
                value.len()
            )));
        }

        let bytes = hex::decode(value)
            .map_err(|e| TandemError::InvalidSecret(format!("not valid hex: {}", e)))?;
        let mut key = [0u8; SECRET_LEN];
        key.copy_from_slice(&bytes);

        Ok(Self::from_bytes(key))
    }

    /// Lowercase hex form, as exchanged during pairing.
    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    pub(crate) fn key(&self) -> &[u8; SECRET_LEN] {
        &self.key
    }
}

impl FromStr for CoupleSecret {
    type Err = TandemError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl std::fmt::Debug for CoupleSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CoupleSecret(<redacted>)")
    }
}

/// Generate a new couple secret from the OS random source.
pub fn generate_secret() -> CoupleSecret {
    generate_secret_with_source().0
}

/// Generate a new couple secret and report which random source produced it.
pub fn generate_secret_with_source() -> (CoupleSecret, SecretSource) {
    let mut key = [0u8; SECRET_LEN];

    match OsRng.try_fill_bytes(&mut key) {
        Ok(()) => (CoupleSecret::from_bytes(key), SecretSource::Os),
        Err(e) => {
            warn!(
                weak_entropy = true,
                "OS random source unavailable ({}), using weak fallback generator", e
            );
            weak_fill(&mut key);
            (CoupleSecret::from_bytes(key), SecretSource::WeakFallback)
        }
    }
}

fn weak_fill(buf: &mut [u8]) {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let seed = nanos ^ (u64::from(std::process::id())).rotate_left(32);

    StdRng::seed_from_u64(seed).fill_bytes(buf);
}

/// SHA-256 of the hex form, hex encoded. Safe to store remotely.
pub fn hash_secret(secret: &CoupleSecret) -> String {
    hex::encode(Sha256::digest(secret.as_hex().as_bytes()))
}

/// Check a secret against a stored verification hash.
pub fn verify_secret(secret: &CoupleSecret, stored_hash: &str) -> bool {
    let computed = hash_secret(secret);
    let stored = stored_hash.trim().to_ascii_lowercase();

    computed.as_bytes().ct_eq(stored.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_64_hex_chars() {
        let (secret, source) = generate_secret_with_source();
        assert_eq!(source, SecretSource::Os);
        assert_eq!(secret.as_hex().len(), 64);
        assert!(secret.as_hex().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_secret(), secret);
    }

    #[test]
    fn test_from_hex_validation() {
        assert!(CoupleSecret::from_hex("abcd").is_err());
        assert!(CoupleSecret::from_hex(&"zz".repeat(32)).is_err());

        let upper = "AB".repeat(32);
        let secret: CoupleSecret = upper.parse().unwrap();
        assert_eq!(secret.as_hex(), "ab".repeat(32));
    }

    #[test]
    fn test_hash_and_verify() {
        let secret = CoupleSecret::from_hex(&"11".repeat(32)).unwrap();
        let hash = hash_secret(&secret);

        assert_eq!(hash.len(), 64);
        assert_ne!(hash, secret.as_hex());
        assert!(verify_secret(&secret, &hash));
        assert!(verify_secret(&secret, &hash.to_uppercase()));

        let other = CoupleSecret::from_hex(&"22".repeat(32)).unwrap();
        assert!(!verify_secret(&other, &hash));
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = generate_secret();
        let printed = format!("{:?}", secret);
        assert!(!printed.contains(secret.as_hex()));
    }

    #[test]
    fn test_weak_fill_produces_bytes() {
        let mut buf = [0u8; SECRET_LEN];
        weak_fill(&mut buf);
        assert_ne!(buf, [0u8; SECRET_LEN]);
    }
}
