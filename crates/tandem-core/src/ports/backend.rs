//! Remote message store contract

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tandem_types::{NewEnvelope, StoredEnvelope};

/// Receives the full current envelope set of a couple on every change.
pub type EnvelopeListener = Arc<dyn Fn(Vec<StoredEnvelope>) + Send + Sync>;

/// Live subscription handle.
///
/// Dropping the handle cancels the subscription. Cancelling twice is a no-op.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Handle with nothing to cancel.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Document store holding encrypted envelopes.
///
/// The backend never sees plaintext. Unavailability must be reported as
/// [`crate::TandemError::Transient`] so callers can retry or queue.
#[async_trait]
pub trait MessageBackend: Send + Sync {
    /// Persist a new envelope and return its backend-assigned id.
    async fn create(&self, envelope: NewEnvelope) -> Result<String>;

    async fn get(&self, id: &str) -> Result<Option<StoredEnvelope>>;

    /// Envelopes of a couple, newest first, optionally limited.
    async fn get_messages_for_couple(
        &self,
        couple_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEnvelope>>;

    /// Register a listener. It receives the current set immediately and
    /// again on every change until the returned handle is cancelled.
    async fn subscribe_to_messages(
        &self,
        couple_id: &str,
        listener: EnvelopeListener,
    ) -> Result<Subscription>;

    async fn mark_as_read(&self, id: &str, user_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Envelopes of the couple not sent by `user_id` and not yet read.
    async fn get_unread_count(&self, couple_id: &str, user_id: &str) -> Result<u64>;

    async fn delete_message(&self, id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_subscription_cancels_once() {
        let cancelled = Arc::new(AtomicU32::new(0));
        let counter = cancelled.clone();

        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(subscription.is_active());
        subscription.unsubscribe();

        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_cancels() {
        let cancelled = Arc::new(AtomicU32::new(0));
        let counter = cancelled.clone();

        {
            let _subscription = Subscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert!(!Subscription::detached().is_active());
    }
}
