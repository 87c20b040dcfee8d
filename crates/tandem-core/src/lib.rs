//! Tandem Core Library
//!
//! Encryption, transport, and the offline outbox for two-party couple
//! messaging. Backends and persistence plug in through the [`ports`] traits.

// Re-export pure types from tandem-types
pub use tandem_types::*;

pub mod adapters;
pub mod config;
pub mod crypto;
pub mod error;
pub mod outbox;
pub mod ports;
pub mod transport;

pub use crate::config::{OutboxConfig, TandemConfig};
pub use crypto::{CipherService, CoupleSecret, SecurityLevel};
pub use error::{ErrorClass, Result, TandemError};
pub use outbox::{Conversation, OutboxEvent, OutboxStore, ReconcileReport, SendOutcome};
pub use ports::{MessageBackend, OutboxPersistence, Subscription};
pub use transport::{DecryptedBatch, RetryPolicy, TransportClient};
