use super::OutboxEvent;
use crate::config::OutboxConfig;
use crate::crypto::CoupleSecret;
use crate::ports::{OutboxPersistence, OutboxSnapshot, Subscription};
use crate::transport::{DecryptFailure, TransportClient};
use crate::{Result, TandemError};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tandem_types::{unread_count, Message, MessageContent, PendingMessage};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 64;

/// The paired conversation a device is acting in.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub couple_id: String,
    pub user_id: String,
    pub secret: CoupleSecret,
}

impl Conversation {
    pub fn new(couple_id: impl Into<String>, user_id: impl Into<String>, secret: CoupleSecret) -> Self {
        Self {
            couple_id: couple_id.into(),
            user_id: user_id.into(),
            secret,
        }
    }
}

/// What happened to a send.
#[derive(Debug)]
pub enum SendOutcome {
    /// Confirmed by the backend
    Synced { local_id: String, message_id: String },
    /// Kept in the pending queue for the next reconciliation
    Queued { local_id: String, error: TandemError },
}

impl SendOutcome {
    pub fn local_id(&self) -> &str {
        match self {
            SendOutcome::Synced { local_id, .. } | SendOutcome::Queued { local_id, .. } => local_id,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, SendOutcome::Synced { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedMessage {
    pub local_id: String,
    pub message_id: String,
}

#[derive(Debug)]
pub struct FailedSend {
    pub local_id: String,
    pub retry_count: u32,
    pub error: TandemError,
}

/// A pending message removed after exhausting its retries. Hand `pending`
/// to [`OutboxStore::requeue`] to try again.
#[derive(Debug)]
pub struct DroppedMessage {
    pub pending: PendingMessage,
    pub reason: TandemError,
}

/// Outcome of one reconciliation run.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub synced: Vec<SyncedMessage>,
    pub failed: Vec<FailedSend>,
    pub dropped: Vec<DroppedMessage>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.synced.is_empty() && self.failed.is_empty() && self.dropped.is_empty()
    }
}

#[derive(Default)]
struct OutboxState {
    messages: Vec<Message>,
    pending: Vec<PendingMessage>,
    unread_count: usize,
    user_id: Option<String>,
    /// Pending entries with a network call in progress
    in_flight: HashSet<String>,
    /// Bumped on every (un)subscribe; stale callbacks compare and bail
    generation: u64,
}

impl OutboxState {
    fn snapshot(&self) -> OutboxSnapshot {
        OutboxSnapshot {
            messages: self.messages.clone(),
            pending: self.pending.clone(),
        }
    }

    fn recount(&mut self) {
        self.unread_count = match &self.user_id {
            Some(user_id) => unread_count(&self.messages, user_id),
            None => 0,
        };
    }

    fn remove_pending(&mut self, local_id: &str) -> Option<PendingMessage> {
        let idx = self.pending.iter().position(|p| p.local_id == local_id)?;
        Some(self.pending.remove(idx))
    }

    /// Add a confirmed message unless a live batch already delivered it.
    fn confirm(&mut self, pending: PendingMessage, message_id: &str) {
        if self.messages.iter().any(|m| m.id == message_id) {
            return;
        }

        self.messages.push(Message {
            id: message_id.to_string(),
            couple_id: pending.couple_id.clone(),
            sender_id: pending.sender_id.clone(),
            message_type: pending.message_type(),
            content: pending.content,
            created_at: Utc::now(),
            read_at: None,
            read_by: None,
        });
        self.messages
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        self.recount();
    }

    fn updated_event(&self) -> OutboxEvent {
        OutboxEvent::MessagesUpdated {
            count: self.messages.len(),
            unread_count: self.unread_count,
        }
    }
}

fn lock(state: &Mutex<OutboxState>) -> MutexGuard<'_, OutboxState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Writes the latest state. The gate serializes writers and the snapshot is
/// taken after acquiring it, so the last write always reflects the newest
/// state.
#[derive(Clone)]
struct Persister {
    state: Arc<Mutex<OutboxState>>,
    persistence: Arc<dyn OutboxPersistence>,
    gate: Arc<tokio::sync::Mutex<()>>,
    events: broadcast::Sender<OutboxEvent>,
}

impl Persister {
    async fn persist(&self) -> Result<()> {
        let _guard = self.gate.lock().await;
        let snapshot = lock(&self.state).snapshot();
        self.persistence.save(&snapshot).await
    }

    /// Persist, reporting a failure as an event instead of an error.
    async fn persist_reported(&self) {
        if let Err(e) = self.persist().await {
            error!("Failed to persist outbox: {}", e);
            let _ = self.events.send(OutboxEvent::PersistFailed {
                reason: e.to_string(),
            });
        }
    }
}

/// Marks a pending entry as having a network call in progress.
///
/// The mark is released on drop, so a cancelled send or reconciliation
/// future leaves the entry eligible for the next run.
struct InFlight {
    state: Arc<Mutex<OutboxState>>,
    local_id: String,
}

impl InFlight {
    /// Record the mark in an already locked state.
    fn claim(state: &Arc<Mutex<OutboxState>>, locked: &mut OutboxState, local_id: &str) -> Self {
        locked.in_flight.insert(local_id.to_string());
        Self {
            state: state.clone(),
            local_id: local_id.to_string(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.state).in_flight.remove(&self.local_id);
    }
}

fn runtime_handle() -> Result<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current()
        .map_err(|e| TandemError::Config(format!("outbox subscription needs a tokio runtime: {}", e)))
}

enum Claim {
    Send(PendingMessage, InFlight),
    Drop(PendingMessage),
}

/// Client-side message state for one device.
///
/// Sends are queued and persisted before they touch the network, so nothing
/// composed offline is lost. Reconciliation is explicit: call
/// [`OutboxStore::process_pending_messages`] when connectivity returns.
pub struct OutboxStore {
    transport: TransportClient,
    max_retries: u32,
    state: Arc<Mutex<OutboxState>>,
    persister: Persister,
    subscription: Mutex<Option<Subscription>>,
    subscribe_gate: tokio::sync::Mutex<()>,
    reconcile_gate: tokio::sync::Mutex<()>,
    events: broadcast::Sender<OutboxEvent>,
}

impl OutboxStore {
    /// Build the store and rehydrate it from `persistence`.
    pub async fn open(
        transport: TransportClient,
        persistence: Arc<dyn OutboxPersistence>,
        config: &OutboxConfig,
    ) -> Result<Self> {
        let mut state = OutboxState::default();
        if let Some(snapshot) = persistence.load().await? {
            info!(
                messages = snapshot.messages.len(),
                pending = snapshot.pending.len(),
                "Outbox rehydrated"
            );
            state.messages = snapshot.messages;
            state.pending = snapshot.pending;
        }

        let state = Arc::new(Mutex::new(state));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            transport,
            max_retries: config.max_retries,
            persister: Persister {
                state: state.clone(),
                persistence,
                gate: Arc::new(tokio::sync::Mutex::new(())),
                events: events.clone(),
            },
            state,
            subscription: Mutex::new(None),
            subscribe_gate: tokio::sync::Mutex::new(()),
            reconcile_gate: tokio::sync::Mutex::new(()),
            events,
        })
    }

    pub fn events(&self) -> broadcast::Receiver<OutboxEvent> {
        self.events.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.state).messages.clone()
    }

    pub fn pending(&self) -> Vec<PendingMessage> {
        lock(&self.state).pending.clone()
    }

    pub fn unread_count(&self) -> usize {
        lock(&self.state).unread_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription_slot().is_some()
    }

    /// Queue, persist, then try to deliver.
    ///
    /// Only rejected input is returned as `Err`; once queued, a failed
    /// delivery is reported as [`SendOutcome::Queued`].
    pub async fn send(&self, conversation: &Conversation, content: MessageContent) -> Result<SendOutcome> {
        if conversation.couple_id.trim().is_empty() || conversation.user_id.trim().is_empty() {
            return Err(TandemError::Validation(
                "conversation needs a couple id and a user id".to_string(),
            ));
        }
        content.validate()?;

        let pending = PendingMessage::new(&conversation.couple_id, &conversation.user_id, content);
        let local_id = pending.local_id.clone();
        let in_flight = {
            let mut state = lock(&self.state);
            state.pending.push(pending.clone());
            InFlight::claim(&self.state, &mut state, &local_id)
        };
        self.persist_logged().await;
        self.emit(OutboxEvent::MessageQueued {
            local_id: local_id.clone(),
        });

        let result = self
            .transport
            .send(
                &conversation.couple_id,
                &conversation.user_id,
                pending.content.clone(),
                &conversation.secret,
            )
            .await;

        match result {
            Ok(message_id) => {
                self.confirm_quiet(&local_id, &message_id);
                drop(in_flight);
                self.persist_logged().await;
                let event = lock(&self.state).updated_event();
                self.emit(event);
                Ok(SendOutcome::Synced {
                    local_id,
                    message_id,
                })
            }
            Err(error) => {
                drop(in_flight);
                warn!(local_id = %local_id, "Send failed, message stays queued: {}", error);
                Ok(SendOutcome::Queued { local_id, error })
            }
        }
    }

    pub async fn send_text(&self, conversation: &Conversation, text: &str) -> Result<SendOutcome> {
        self.send(conversation, MessageContent::text(text)).await
    }

    pub async fn send_task_request(
        &self,
        conversation: &Conversation,
        task_id: &str,
        title: &str,
        description: Option<String>,
    ) -> Result<SendOutcome> {
        self.send(conversation, MessageContent::task_request(task_id, title, description))
            .await
    }

    pub async fn send_task_update(
        &self,
        conversation: &Conversation,
        task_id: &str,
        title: &str,
        text: &str,
    ) -> Result<SendOutcome> {
        self.send(conversation, MessageContent::task_update(task_id, title, text))
            .await
    }

    pub async fn send_energy_boost(
        &self,
        conversation: &Conversation,
        points: u32,
        text: Option<String>,
    ) -> Result<SendOutcome> {
        self.send(conversation, MessageContent::energy_boost(points, text))
            .await
    }

    pub async fn send_mood_share(
        &self,
        conversation: &Conversation,
        mood: &str,
        text: Option<String>,
    ) -> Result<SendOutcome> {
        self.send(conversation, MessageContent::mood_share(mood, text))
            .await
    }

    /// Retry every queued message once.
    ///
    /// Entries that already used `max_retries` attempts are dropped and
    /// reported. Runs are serialized.
    pub async fn process_pending_messages(&self, secret: &CoupleSecret) -> Result<ReconcileReport> {
        let _gate = self.reconcile_gate.lock().await;
        let mut report = ReconcileReport::default();

        let candidates: Vec<String> = {
            let state = lock(&self.state);
            state
                .pending
                .iter()
                .filter(|p| !state.in_flight.contains(&p.local_id))
                .map(|p| p.local_id.clone())
                .collect()
        };

        if candidates.is_empty() {
            return Ok(report);
        }
        debug!(count = candidates.len(), "Reconciling pending messages");

        for local_id in candidates {
            // Drop-or-claim happens under one lock so no concurrent path can
            // observe a half-updated entry
            let claim = {
                let mut state = lock(&self.state);
                let Some(idx) = state.pending.iter().position(|p| p.local_id == local_id) else {
                    continue;
                };
                if state.pending[idx].retry_count >= self.max_retries {
                    Claim::Drop(state.pending.remove(idx))
                } else {
                    let pending = state.pending[idx].clone();
                    Claim::Send(pending, InFlight::claim(&self.state, &mut state, &local_id))
                }
            };

            match claim {
                Claim::Drop(pending) => {
                    let attempts = pending.retry_count;
                    let reason = TandemError::QueueExhausted {
                        local_id: local_id.clone(),
                        attempts,
                    };
                    warn!(local_id = %local_id, attempts, "{}", reason);
                    self.emit(OutboxEvent::MessageDropped {
                        local_id: local_id.clone(),
                        attempts,
                    });
                    report.dropped.push(DroppedMessage { pending, reason });
                }
                Claim::Send(pending, in_flight) => {
                    let result = self
                        .transport
                        .send(&pending.couple_id, &pending.sender_id, pending.content.clone(), secret)
                        .await;

                    match result {
                        Ok(message_id) => {
                            self.confirm_quiet(&local_id, &message_id);
                            drop(in_flight);
                            report.synced.push(SyncedMessage {
                                local_id,
                                message_id,
                            });
                        }
                        Err(error) => {
                            let retry_count = {
                                let mut state = lock(&self.state);
                                match state.pending.iter_mut().find(|p| p.local_id == local_id) {
                                    Some(entry) => {
                                        entry.retry_count += 1;
                                        entry.retry_count
                                    }
                                    None => pending.retry_count,
                                }
                            };
                            drop(in_flight);
                            debug!(local_id = %local_id, retry_count, "Resend failed: {}", error);
                            report.failed.push(FailedSend {
                                local_id,
                                retry_count,
                                error,
                            });
                        }
                    }
                }
            }
        }

        self.persist_logged().await;
        if !report.synced.is_empty() {
            let event = lock(&self.state).updated_event();
            self.emit(event);
        }

        info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            dropped = report.dropped.len(),
            "Reconciliation finished"
        );
        Ok(report)
    }

    /// Put a dropped message back in the queue with a fresh local id and
    /// retry budget. It is sent on the next reconciliation run.
    pub async fn requeue(&self, dropped: PendingMessage) -> Result<String> {
        let pending = PendingMessage::new(dropped.couple_id, dropped.sender_id, dropped.content);
        let local_id = pending.local_id.clone();

        lock(&self.state).pending.push(pending);
        self.persister.persist().await?;
        self.emit(OutboxEvent::MessageQueued {
            local_id: local_id.clone(),
        });

        info!(local_id = %local_id, "Message requeued");
        Ok(local_id)
    }

    /// Follow the conversation live, replacing any previous subscription.
    pub async fn subscribe(&self, conversation: &Conversation) -> Result<()> {
        let runtime = runtime_handle()?;
        let _gate = self.subscribe_gate.lock().await;

        // The old subscription is cancelled before the new one exists
        self.unsubscribe();

        let generation = {
            let mut state = lock(&self.state);
            state.user_id = Some(conversation.user_id.clone());
            state.recount();
            state.generation
        };

        let state = self.state.clone();
        let events = self.events.clone();
        let persister = self.persister.clone();

        let on_messages = move |messages: Vec<Message>| {
            let event = {
                let mut state = lock(&state);
                if state.generation != generation {
                    return;
                }
                state.messages = messages;
                state.recount();
                state.updated_event()
            };
            let _ = events.send(event);

            let persister = persister.clone();
            runtime.spawn(async move { persister.persist_reported().await });
        };

        let failure_events = self.events.clone();
        let on_error = move |failure: DecryptFailure| {
            let _ = failure_events.send(OutboxEvent::DecryptionFailed {
                envelope_id: failure.envelope_id,
                reason: failure.error.to_string(),
            });
        };

        let subscription = self
            .transport
            .subscribe_to_messages(
                &conversation.couple_id,
                conversation.secret.clone(),
                on_messages,
                on_error,
            )
            .await?;

        *self.subscription_slot() = Some(subscription);
        info!(couple_id = %conversation.couple_id, "Outbox subscribed");
        Ok(())
    }

    /// Cancel the live subscription, if any.
    pub fn unsubscribe(&self) {
        let previous = self.subscription_slot().take();
        lock(&self.state).generation += 1;

        if let Some(subscription) = previous {
            subscription.unsubscribe();
            debug!("Outbox unsubscribed");
        }
    }

    pub async fn mark_message_as_read(&self, message_id: &str, user_id: &str) -> Result<()> {
        let at = self.transport.mark_as_read(message_id, user_id).await?;

        let event = {
            let mut state = lock(&self.state);
            if let Some(message) = state.messages.iter_mut().find(|m| m.id == message_id) {
                message.mark_read(user_id, at);
            }
            state.recount();
            state.updated_event()
        };

        self.persist_logged().await;
        self.emit(event);
        Ok(())
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<()> {
        self.transport.delete_message(message_id).await?;

        let event = {
            let mut state = lock(&self.state);
            state.messages.retain(|m| m.id != message_id);
            state.recount();
            state.updated_event()
        };

        self.persist_logged().await;
        self.emit(event);
        Ok(())
    }

    /// Forget everything: used when the couple unpairs.
    pub async fn reset(&self) -> Result<()> {
        self.unsubscribe();

        let event = {
            let mut state = lock(&self.state);
            let generation = state.generation;
            *state = OutboxState {
                generation,
                ..OutboxState::default()
            };
            state.updated_event()
        };

        self.persister.persist().await?;
        self.emit(event);
        info!("Outbox reset");
        Ok(())
    }

    fn confirm_quiet(&self, local_id: &str, message_id: &str) {
        {
            let mut state = lock(&self.state);
            if let Some(pending) = state.remove_pending(local_id) {
                state.confirm(pending, message_id);
            }
        }

        self.emit(OutboxEvent::MessageSynced {
            local_id: local_id.to_string(),
            message_id: message_id.to_string(),
        });
    }

    async fn persist_logged(&self) {
        self.persister.persist_reported().await;
    }

    fn emit(&self, event: OutboxEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn subscription_slot(&self) -> MutexGuard<'_, Option<Subscription>> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for OutboxStore {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription_slot().take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{JsonFileStore, MemoryBackend, MemoryPersistence};
    use crate::crypto::{generate_secret, CipherService};
    use crate::ports::{EnvelopeListener, MessageBackend};
    use crate::transport::RetryPolicy;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::time::Duration;
    use tandem_types::{NewEnvelope, StoredEnvelope};
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio_test::assert_ok;

    fn transport(backend: &MemoryBackend) -> TransportClient {
        let policy = RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_timeout(Duration::from_secs(2));
        TransportClient::new(Arc::new(backend.clone()), CipherService::probe(), policy)
    }

    async fn store_with(
        backend: &MemoryBackend,
        persistence: Arc<dyn OutboxPersistence>,
    ) -> OutboxStore {
        OutboxStore::open(transport(backend), persistence, &OutboxConfig::default())
            .await
            .unwrap()
    }

    async fn store(backend: &MemoryBackend) -> OutboxStore {
        store_with(backend, Arc::new(MemoryPersistence::new())).await
    }

    /// Backend whose `create` takes a while to answer.
    struct SlowBackend {
        inner: MemoryBackend,
        delay: Duration,
    }

    #[async_trait]
    impl MessageBackend for SlowBackend {
        async fn create(&self, envelope: NewEnvelope) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            self.inner.create(envelope).await
        }

        async fn get(&self, id: &str) -> Result<Option<StoredEnvelope>> {
            self.inner.get(id).await
        }

        async fn get_messages_for_couple(
            &self,
            couple_id: &str,
            limit: Option<usize>,
        ) -> Result<Vec<StoredEnvelope>> {
            self.inner.get_messages_for_couple(couple_id, limit).await
        }

        async fn subscribe_to_messages(
            &self,
            couple_id: &str,
            listener: EnvelopeListener,
        ) -> Result<Subscription> {
            self.inner.subscribe_to_messages(couple_id, listener).await
        }

        async fn mark_as_read(&self, id: &str, user_id: &str, at: DateTime<Utc>) -> Result<()> {
            self.inner.mark_as_read(id, user_id, at).await
        }

        async fn get_unread_count(&self, couple_id: &str, user_id: &str) -> Result<u64> {
            self.inner.get_unread_count(couple_id, user_id).await
        }

        async fn delete_message(&self, id: &str) -> Result<()> {
            self.inner.delete_message(id).await
        }
    }

    struct BrokenDisk;

    #[async_trait]
    impl OutboxPersistence for BrokenDisk {
        async fn load(&self) -> Result<Option<OutboxSnapshot>> {
            Ok(None)
        }

        async fn save(&self, _snapshot: &OutboxSnapshot) -> Result<()> {
            Err(TandemError::Storage("disk full".to_string()))
        }
    }

    async fn open_store(backend: Arc<dyn MessageBackend>, policy: RetryPolicy) -> OutboxStore {
        let transport = TransportClient::new(backend, CipherService::probe(), policy);
        OutboxStore::open(
            transport,
            Arc::new(MemoryPersistence::new()),
            &OutboxConfig::default(),
        )
        .await
        .unwrap()
    }

    fn single_attempt() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(1)
            .with_timeout(Duration::from_secs(2))
    }

    fn drain(rx: &mut broadcast::Receiver<OutboxEvent>) -> Vec<OutboxEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => return events,
            }
        }
    }

    #[tokio::test]
    async fn test_online_send_syncs() {
        let backend = MemoryBackend::new();
        let store = store(&backend).await;
        let conversation = Conversation::new("c", "alice", generate_secret());

        let outcome = store.send_text(&conversation, "hello").await.unwrap();
        assert!(outcome.is_synced());
        assert!(store.pending().is_empty());
        assert_eq!(store.messages().len(), 1);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_send_enqueues() {
        let backend = MemoryBackend::new();
        backend.set_online(false);
        let store = store(&backend).await;
        let conversation = Conversation::new("c", "alice", generate_secret());

        let outcome = store.send_text(&conversation, "hello").await.unwrap();
        match &outcome {
            SendOutcome::Queued { error, .. } => assert!(error.is_transport_failure()),
            other => panic!("unexpected: {:?}", other),
        }

        let pending = store.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_id, outcome.local_id());
        assert_eq!(pending[0].retry_count, 0);
        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_content_is_not_queued() {
        let backend = MemoryBackend::new();
        let store = store(&backend).await;
        let conversation = Conversation::new("c", "alice", generate_secret());

        let result = store.send_text(&conversation, "").await;
        assert!(matches!(result, Err(TandemError::InvalidContent(_))));
        assert!(store.pending().is_empty());
        assert_eq!(backend.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_bounded_retry_drops_after_max() {
        let backend = MemoryBackend::new();
        backend.set_online(false);
        let store = store(&backend).await;
        let conversation = Conversation::new("c", "alice", generate_secret());
        let mut events = store.events();

        store.send_text(&conversation, "hello").await.unwrap();

        for expected in 1..=3 {
            let report = store
                .process_pending_messages(&conversation.secret)
                .await
                .unwrap();
            assert_eq!(report.failed.len(), 1);
            assert_eq!(store.pending()[0].retry_count, expected);
        }

        let report = store
            .process_pending_messages(&conversation.secret)
            .await
            .unwrap();
        assert_eq!(report.dropped.len(), 1);
        assert!(matches!(
            report.dropped[0].reason,
            TandemError::QueueExhausted { attempts: 3, .. }
        ));
        assert!(store.pending().is_empty());

        let dropped_events = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, OutboxEvent::MessageDropped { .. }))
            .count();
        assert_eq!(dropped_events, 1);
    }

    #[tokio::test]
    async fn test_reconcile_after_reconnect() {
        let backend = MemoryBackend::new();
        backend.set_online(false);
        let store = store(&backend).await;
        let conversation = Conversation::new("c", "alice", generate_secret());

        store.send_text(&conversation, "one").await.unwrap();
        store
            .send_mood_share(&conversation, "sleepy", None)
            .await
            .unwrap();
        assert_eq!(store.pending().len(), 2);

        backend.set_online(true);
        let report = store
            .process_pending_messages(&conversation.secret)
            .await
            .unwrap();

        assert_eq!(report.synced.len(), 2);
        assert!(store.pending().is_empty());
        assert_eq!(store.messages().len(), 2);
        assert_eq!(backend.len(), 2);

        let second = store
            .process_pending_messages(&conversation.secret)
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_requeue_dropped_message() {
        let backend = MemoryBackend::new();
        backend.set_online(false);
        let store = store(&backend).await;
        let conversation = Conversation::new("c", "alice", generate_secret());

        store.send_text(&conversation, "hello").await.unwrap();
        for _ in 0..3 {
            store
                .process_pending_messages(&conversation.secret)
                .await
                .unwrap();
        }
        let mut report = store
            .process_pending_messages(&conversation.secret)
            .await
            .unwrap();
        let dropped = report.dropped.pop().unwrap().pending;

        let local_id = store.requeue(dropped.clone()).await.unwrap();
        assert_ne!(local_id, dropped.local_id);
        assert_eq!(store.pending()[0].retry_count, 0);

        backend.set_online(true);
        let report = store
            .process_pending_messages(&conversation.secret)
            .await
            .unwrap();
        assert_eq!(report.synced[0].local_id, local_id);
    }

    #[tokio::test]
    async fn test_single_live_subscription() {
        let backend = MemoryBackend::new();
        let secret = generate_secret();
        let alice = store(&backend).await;
        let bob = store(&backend).await;
        let alice_conv = Conversation::new("c", "alice", secret.clone());
        let bob_conv = Conversation::new("c", "bob", secret);

        bob.subscribe(&bob_conv).await.unwrap();
        bob.subscribe(&bob_conv).await.unwrap();
        assert_eq!(backend.subscriber_count(), 1);
        assert!(bob.is_subscribed());

        let mut events = bob.events();
        alice.send_text(&alice_conv, "hi bob").await.unwrap();

        let updates = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, OutboxEvent::MessagesUpdated { .. }))
            .count();
        assert_eq!(updates, 1);
        assert_eq!(bob.messages().len(), 1);
        assert_eq!(bob.unread_count(), 1);

        bob.unsubscribe();
        assert_eq!(backend.subscriber_count(), 0);
        assert!(!bob.is_subscribed());
    }

    #[tokio::test]
    async fn test_mark_as_read_updates_unread() {
        let backend = MemoryBackend::new();
        let secret = generate_secret();
        let alice = store(&backend).await;
        let bob = store(&backend).await;
        let alice_conv = Conversation::new("c", "alice", secret.clone());
        let bob_conv = Conversation::new("c", "bob", secret);

        bob.subscribe(&bob_conv).await.unwrap();
        let outcome = alice.send_text(&alice_conv, "hi").await.unwrap();
        let SendOutcome::Synced { message_id, .. } = outcome else {
            panic!("expected synced send");
        };
        bob.send_text(&bob_conv, "hey").await.unwrap();
        assert_eq!(bob.unread_count(), 1);

        assert_ok!(bob.mark_message_as_read(&message_id, "bob").await);
        assert_eq!(bob.unread_count(), 0);
        let read = bob
            .messages()
            .into_iter()
            .find(|m| m.id == message_id)
            .unwrap();
        assert_eq!(read.read_by.as_deref(), Some("bob"));

        assert_ok!(bob.delete_message(&message_id).await);
        assert_eq!(bob.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_undecryptable_envelope_reported() {
        let backend = MemoryBackend::new();
        let store = store(&backend).await;
        let stranger = transport(&backend);
        let conversation = Conversation::new("c", "alice", generate_secret());
        let mut events = store.events();

        store.subscribe(&conversation).await.unwrap();
        stranger
            .send_text("c", "mallory", "foreign key", &generate_secret())
            .await
            .unwrap();
        store.send_text(&conversation, "mine").await.unwrap();

        let failures = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, OutboxEvent::DecryptionFailed { .. }))
            .count();
        assert!(failures >= 1);
        assert_eq!(store.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_pending_survives_restart() {
        let backend = MemoryBackend::new();
        backend.set_online(false);
        let persistence: Arc<dyn OutboxPersistence> = Arc::new(MemoryPersistence::new());
        let conversation = Conversation::new("c", "alice", generate_secret());

        let local_id = {
            let store = store_with(&backend, persistence.clone()).await;
            let outcome = store.send_text(&conversation, "hello").await.unwrap();
            store
                .process_pending_messages(&conversation.secret)
                .await
                .unwrap();
            outcome.local_id().to_string()
        };

        let reopened = store_with(&backend, persistence).await;
        let pending = reopened.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_id, local_id);
        assert_eq!(pending[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_messages_survive_restart_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");
        let backend = MemoryBackend::new();
        let conversation = Conversation::new("c", "alice", generate_secret());

        {
            let store = store_with(&backend, Arc::new(JsonFileStore::new(&path))).await;
            store.send_text(&conversation, "kept").await.unwrap();
        }

        let reopened = store_with(&backend, Arc::new(JsonFileStore::new(&path))).await;
        let messages = reopened.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.preview(), "kept");
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let backend = MemoryBackend::new();
        let store = store(&backend).await;
        let conversation = Conversation::new("c", "alice", generate_secret());

        store.subscribe(&conversation).await.unwrap();
        store.send_text(&conversation, "hello").await.unwrap();
        backend.set_online(false);
        store.send_text(&conversation, "queued").await.unwrap();

        store.reset().await.unwrap();
        assert!(store.messages().is_empty());
        assert!(store.pending().is_empty());
        assert!(!store.is_subscribed());
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_send_is_retried_later() {
        let backend = MemoryBackend::new();
        backend.set_online(false);
        let policy = RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(500))
            .with_timeout(Duration::from_secs(5));
        let store = open_store(Arc::new(backend.clone()), policy).await;
        let conversation = Conversation::new("c", "alice", generate_secret());

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            store.send_text(&conversation, "hello"),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(store.pending().len(), 1);

        backend.set_online(true);
        let report = store
            .process_pending_messages(&conversation.secret)
            .await
            .unwrap();

        assert_eq!(report.synced.len(), 1);
        assert!(store.pending().is_empty());
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_reconcile_releases_claim() {
        let backend = MemoryBackend::new();
        let slow = SlowBackend {
            inner: backend.clone(),
            delay: Duration::from_millis(300),
        };
        let store = open_store(Arc::new(slow), single_attempt()).await;
        let conversation = Conversation::new("c", "alice", generate_secret());

        backend.set_online(false);
        store.send_text(&conversation, "hello").await.unwrap();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            store.process_pending_messages(&conversation.secret),
        )
        .await;
        assert!(cancelled.is_err());

        let report = store
            .process_pending_messages(&conversation.secret)
            .await
            .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(store.pending()[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_reconcile_skips_send_in_progress() {
        let backend = MemoryBackend::new();
        let slow = SlowBackend {
            inner: backend.clone(),
            delay: Duration::from_millis(100),
        };
        let store = open_store(Arc::new(slow), single_attempt()).await;
        let conversation = Conversation::new("c", "alice", generate_secret());

        backend.set_online(false);
        let queued = store.send_text(&conversation, "queued").await.unwrap();
        backend.set_online(true);
        let before = backend.create_calls();

        let (live, report) = tokio::join!(
            store.send_text(&conversation, "live"),
            store.process_pending_messages(&conversation.secret),
        );

        assert!(live.unwrap().is_synced());
        let report = report.unwrap();
        assert_eq!(report.synced.len(), 1);
        assert_eq!(report.synced[0].local_id, queued.local_id());
        assert!(report.failed.is_empty());

        // One create per entry, none duplicated by the overlapping run
        assert_eq!(backend.create_calls() - before, 2);
        assert_eq!(backend.len(), 2);
        assert!(store.pending().is_empty());
        assert_eq!(store.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_runs_count_every_failure() {
        let backend = MemoryBackend::new();
        backend.set_online(false);
        let slow = SlowBackend {
            inner: backend.clone(),
            delay: Duration::from_millis(20),
        };
        let store = open_store(Arc::new(slow), single_attempt()).await;
        let conversation = Conversation::new("c", "alice", generate_secret());

        let first = store.send_text(&conversation, "first").await.unwrap();
        let (second, report) = tokio::join!(
            store.send_text(&conversation, "second"),
            store.process_pending_messages(&conversation.secret),
        );
        let second = second.unwrap();

        // The run left the entry that was still being sent alone
        let report = report.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].local_id, first.local_id());

        let (a, b) = tokio::join!(
            store.process_pending_messages(&conversation.secret),
            store.process_pending_messages(&conversation.secret),
        );
        assert_eq!(a.unwrap().failed.len(), 2);
        assert_eq!(b.unwrap().failed.len(), 2);

        let retries = |local_id: &str| {
            store
                .pending()
                .into_iter()
                .find(|p| p.local_id == local_id)
                .map(|p| p.retry_count)
        };
        assert_eq!(retries(first.local_id()), Some(3));
        assert_eq!(retries(second.local_id()), Some(2));
    }

    #[test]
    fn test_subscribe_needs_runtime() {
        assert!(matches!(runtime_handle(), Err(TandemError::Config(_))));
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported() {
        let backend = MemoryBackend::new();
        let store = store_with(&backend, Arc::new(BrokenDisk)).await;
        let conversation = Conversation::new("c", "alice", generate_secret());
        let mut events = store.events();

        let outcome = store.send_text(&conversation, "hello").await.unwrap();
        assert!(outcome.is_synced());
        assert_eq!(store.messages().len(), 1);

        let failures = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, OutboxEvent::PersistFailed { .. }))
            .count();
        assert!(failures >= 1);
    }
}
