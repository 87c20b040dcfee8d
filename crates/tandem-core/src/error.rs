//! Error types for Tandem
//!
//! Failures are tagged where they happen. The retry policy dispatches on
//! [`ErrorClass`], never on message text.

use std::time::Duration;
use tandem_types::ContentError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TandemError>;

#[derive(Error, Debug)]
pub enum TandemError {
    /// Network unavailability or backend throttling.
    #[error("Backend unavailable: {0}")]
    Transient(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<TandemError>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid content: {0}")]
    InvalidContent(#[from] ContentError),

    #[error("Invalid secret: {0}")]
    InvalidSecret(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Pending message {local_id} dropped after {attempts} failed attempts")]
    QueueExhausted { local_id: String, attempts: u32 },

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

/// Closed classification used by the retry policy and by callers deciding
/// what to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying: the same call may succeed later.
    Transient,
    /// Malformed input. Retrying cannot help.
    Validation,
    /// Wrong key or corrupted ciphertext. Retrying cannot help.
    Decryption,
    /// Local failure (storage, serialization, exhausted budget).
    Fatal,
}

impl TandemError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TandemError::Transient(_) | TandemError::Timeout(_) => ErrorClass::Transient,
            TandemError::Validation(_)
            | TandemError::InvalidContent(_)
            | TandemError::InvalidSecret(_)
            | TandemError::MessageNotFound(_) => ErrorClass::Validation,
            TandemError::Decryption(_) => ErrorClass::Decryption,
            TandemError::RetriesExhausted { .. }
            | TandemError::Encryption(_)
            | TandemError::QueueExhausted { .. }
            | TandemError::Serialization(_)
            | TandemError::Storage(_)
            | TandemError::Io(_)
            | TandemError::Config(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// True when the failure came from the network side, either directly or
    /// after the retry budget ran out. Such sends stay queued.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            TandemError::Transient(_)
                | TandemError::Timeout(_)
                | TandemError::RetriesExhausted { .. }
        )
    }
}

impl From<serde_json::Error> for TandemError {
    fn from(e: serde_json::Error) -> Self {
        TandemError::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for TandemError {
    fn from(e: config::ConfigError) -> Self {
        TandemError::Config(e.to_string())
    }
}
