//! In-memory backend using DashMap, with an outage switch for offline runs

use crate::ports::{EnvelopeListener, MessageBackend, Subscription};
use crate::{Result, TandemError};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tandem_types::{NewEnvelope, StoredEnvelope};
use tracing::debug;

struct Listener {
    couple_id: String,
    callback: EnvelopeListener,
}

struct Inner {
    envelopes: DashMap<String, StoredEnvelope>,
    listeners: DashMap<u64, Listener>,
    online: AtomicBool,
    next_id: AtomicU64,
    next_listener: AtomicU64,
    last_created_ms: AtomicI64,
    create_calls: AtomicU64,
}

/// Shared document store for local runs and tests.
///
/// Clones share state, so two clients can talk through the same instance.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                envelopes: DashMap::new(),
                listeners: DashMap::new(),
                online: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
                next_listener: AtomicU64::new(1),
                last_created_ms: AtomicI64::new(0),
                create_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate connectivity loss. While offline every call fails transiently.
    pub fn set_online(&self, online: bool) {
        debug!(online, "Memory backend connectivity changed");
        self.inner.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Number of `create` calls that reached the store, failed ones included.
    pub fn create_calls(&self) -> u64 {
        self.inner.create_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.envelopes.is_empty()
    }

    /// Store an envelope as-is, bypassing id assignment. Used to plant
    /// corrupt or foreign records.
    pub fn insert_raw(&self, envelope: StoredEnvelope) {
        let couple_id = envelope.couple_id.clone();
        self.inner.envelopes.insert(envelope.id.clone(), envelope);
        self.inner.notify(&couple_id);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(TandemError::Transient("backend offline".to_string()))
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Envelopes of a couple, newest first.
    fn couple_envelopes(&self, couple_id: &str) -> Vec<StoredEnvelope> {
        let mut envelopes: Vec<StoredEnvelope> = self
            .envelopes
            .iter()
            .filter(|entry| entry.couple_id == couple_id)
            .map(|entry| entry.value().clone())
            .collect();

        envelopes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        envelopes
    }

    fn notify(&self, couple_id: &str) {
        // Collect first so no map guard is held while listeners run
        let callbacks: Vec<EnvelopeListener> = self
            .listeners
            .iter()
            .filter(|entry| entry.couple_id == couple_id)
            .map(|entry| entry.callback.clone())
            .collect();

        if callbacks.is_empty() {
            return;
        }

        let snapshot = self.couple_envelopes(couple_id);
        for callback in callbacks {
            callback(snapshot.clone());
        }
    }

    /// Strictly increasing creation time so ordering is stable within a
    /// millisecond.
    fn next_created_at(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_created_ms.load(Ordering::SeqCst);

        loop {
            let candidate = now.max(last + 1);
            match self.last_created_ms.compare_exchange(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Utc
                        .timestamp_millis_opt(candidate)
                        .single()
                        .unwrap_or_else(Utc::now)
                }
                Err(actual) => last = actual,
            }
        }
    }
}

#[async_trait]
impl MessageBackend for MemoryBackend {
    async fn create(&self, envelope: NewEnvelope) -> Result<String> {
        self.inner.create_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;

        let id = format!("msg-{}", self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let couple_id = envelope.couple_id.clone();
        let stored = StoredEnvelope::from_new(id.clone(), envelope, self.inner.next_created_at());

        self.inner.envelopes.insert(id.clone(), stored);
        debug!(couple_id = %couple_id, message_id = %id, "Envelope stored");
        self.inner.notify(&couple_id);

        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<StoredEnvelope>> {
        self.ensure_online()?;
        Ok(self.inner.envelopes.get(id).map(|entry| entry.value().clone()))
    }

    async fn get_messages_for_couple(
        &self,
        couple_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEnvelope>> {
        self.ensure_online()?;

        let mut envelopes = self.inner.couple_envelopes(couple_id);
        if let Some(limit) = limit {
            envelopes.truncate(limit);
        }
        Ok(envelopes)
    }

    async fn subscribe_to_messages(
        &self,
        couple_id: &str,
        listener: EnvelopeListener,
    ) -> Result<Subscription> {
        self.ensure_online()?;

        let listener_id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.insert(
            listener_id,
            Listener {
                couple_id: couple_id.to_string(),
                callback: listener.clone(),
            },
        );
        debug!(couple_id, listener_id, "Listener registered");

        // Initial delivery of the current set
        listener(self.inner.couple_envelopes(couple_id));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.remove(&listener_id);
                debug!(listener_id, "Listener removed");
            }
        }))
    }

    async fn mark_as_read(&self, id: &str, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.ensure_online()?;

        let couple_id = {
            let mut entry = self
                .inner
                .envelopes
                .get_mut(id)
                .ok_or_else(|| TandemError::MessageNotFound(id.to_string()))?;
            entry.read_at = Some(at);
            entry.read_by = Some(user_id.to_string());
            entry.couple_id.clone()
        };

        self.inner.notify(&couple_id);
        Ok(())
    }

    async fn get_unread_count(&self, couple_id: &str, user_id: &str) -> Result<u64> {
        self.ensure_online()?;

        let count = self
            .inner
            .envelopes
            .iter()
            .filter(|e| e.couple_id == couple_id && e.sender_id != user_id && e.read_at.is_none())
            .count();
        Ok(count as u64)
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        self.ensure_online()?;

        let (_, removed) = self
            .inner
            .envelopes
            .remove(id)
            .ok_or_else(|| TandemError::MessageNotFound(id.to_string()))?;

        self.inner.notify(&removed.couple_id);
        Ok(())
    }
}
