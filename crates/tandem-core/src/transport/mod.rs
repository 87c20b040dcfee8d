//! Encrypted message transport with bounded retry

mod client;
mod retry;

pub use client::{DecryptFailure, DecryptedBatch, TransportClient};
pub use retry::{RetryExecutor, RetryPolicy};
