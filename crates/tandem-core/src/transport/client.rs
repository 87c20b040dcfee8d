//! Encrypting transport over a [`MessageBackend`]

use super::{RetryExecutor, RetryPolicy};
use crate::crypto::{CipherService, CoupleSecret};
use crate::ports::{EnvelopeListener, MessageBackend, Subscription};
use crate::{Result, TandemError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tandem_types::{Message, MessageContent, NewEnvelope, StoredEnvelope};
use tracing::{debug, info, warn};

/// An envelope that could not be turned into a message.
#[derive(Debug)]
pub struct DecryptFailure {
    pub envelope_id: String,
    pub error: TandemError,
}

/// Result of decrypting a set of envelopes. Failures do not hide the
/// messages that did decrypt.
#[derive(Debug, Default)]
pub struct DecryptedBatch {
    /// Oldest first
    pub messages: Vec<Message>,
    pub failures: Vec<DecryptFailure>,
}

impl DecryptedBatch {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sends and receives couple messages. Plaintext never reaches the backend.
#[derive(Clone)]
pub struct TransportClient {
    backend: Arc<dyn MessageBackend>,
    cipher: CipherService,
    retry: RetryExecutor,
}

impl TransportClient {
    pub fn new(backend: Arc<dyn MessageBackend>, cipher: CipherService, policy: RetryPolicy) -> Self {
        Self {
            backend,
            cipher,
            retry: RetryExecutor::new(policy),
        }
    }

    pub fn cipher(&self) -> &CipherService {
        &self.cipher
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.retry.policy()
    }

    /// Encrypt and store a message. Returns the backend id.
    pub async fn send(
        &self,
        couple_id: &str,
        sender_id: &str,
        content: MessageContent,
        secret: &CoupleSecret,
    ) -> Result<String> {
        require_id(couple_id, "couple id")?;
        require_id(sender_id, "sender id")?;
        content.validate()?;

        let sealed = self.cipher.encrypt(&content, secret)?;
        let envelope = NewEnvelope::new(couple_id, sender_id, content.message_type(), sealed);

        let backend = self.backend.as_ref();
        let message_id = self
            .retry
            .execute("create", move || backend.create(envelope.clone()))
            .await?;

        info!(
            couple_id,
            message_id = %message_id,
            message_type = %content.message_type(),
            "Message sent"
        );
        Ok(message_id)
    }

    pub async fn send_text(
        &self,
        couple_id: &str,
        sender_id: &str,
        text: &str,
        secret: &CoupleSecret,
    ) -> Result<String> {
        self.send(couple_id, sender_id, MessageContent::text(text), secret)
            .await
    }

    pub async fn send_task_request(
        &self,
        couple_id: &str,
        sender_id: &str,
        task_id: &str,
        title: &str,
        description: Option<String>,
        secret: &CoupleSecret,
    ) -> Result<String> {
        let content = MessageContent::task_request(task_id, title, description);
        self.send(couple_id, sender_id, content, secret).await
    }

    pub async fn send_task_update(
        &self,
        couple_id: &str,
        sender_id: &str,
        task_id: &str,
        title: &str,
        text: &str,
        secret: &CoupleSecret,
    ) -> Result<String> {
        let content = MessageContent::task_update(task_id, title, text);
        self.send(couple_id, sender_id, content, secret).await
    }

    pub async fn send_energy_boost(
        &self,
        couple_id: &str,
        sender_id: &str,
        points: u32,
        text: Option<String>,
        secret: &CoupleSecret,
    ) -> Result<String> {
        let content = MessageContent::energy_boost(points, text);
        self.send(couple_id, sender_id, content, secret).await
    }

    pub async fn send_mood_share(
        &self,
        couple_id: &str,
        sender_id: &str,
        mood: &str,
        text: Option<String>,
        secret: &CoupleSecret,
    ) -> Result<String> {
        let content = MessageContent::mood_share(mood, text);
        self.send(couple_id, sender_id, content, secret).await
    }

    /// Decrypt one stored envelope. No I/O.
    pub fn decrypt_message(&self, envelope: &StoredEnvelope, secret: &CoupleSecret) -> Result<Message> {
        open_envelope(&self.cipher, envelope, secret)
    }

    /// Decrypt a set of envelopes, oldest first. No I/O.
    pub fn decrypt_messages(&self, envelopes: &[StoredEnvelope], secret: &CoupleSecret) -> DecryptedBatch {
        decrypt_all(&self.cipher, envelopes, secret)
    }

    /// Fetch and decrypt the conversation, oldest first.
    pub async fn get_messages(
        &self,
        couple_id: &str,
        secret: &CoupleSecret,
        limit: Option<usize>,
    ) -> Result<DecryptedBatch> {
        let backend = self.backend.as_ref();
        let envelopes = self
            .retry
            .execute("get_messages", move || {
                backend.get_messages_for_couple(couple_id, limit)
            })
            .await?;

        debug!(couple_id, count = envelopes.len(), "Fetched envelopes");
        Ok(self.decrypt_messages(&envelopes, secret))
    }

    /// Live feed of decrypted messages.
    ///
    /// Every backend batch is decrypted; decrypted messages go to
    /// `on_messages` and each undecryptable envelope to `on_error`. One bad
    /// envelope never stops the feed.
    pub async fn subscribe_to_messages<M, E>(
        &self,
        couple_id: &str,
        secret: CoupleSecret,
        on_messages: M,
        on_error: E,
    ) -> Result<Subscription>
    where
        M: Fn(Vec<Message>) + Send + Sync + 'static,
        E: Fn(DecryptFailure) + Send + Sync + 'static,
    {
        let cipher = self.cipher.clone();
        let listener: EnvelopeListener = Arc::new(move |envelopes: Vec<StoredEnvelope>| {
            let batch = decrypt_all(&cipher, &envelopes, &secret);
            for failure in batch.failures {
                on_error(failure);
            }
            on_messages(batch.messages);
        });

        let backend = self.backend.as_ref();
        let subscription = self
            .retry
            .execute("subscribe", move || {
                backend.subscribe_to_messages(couple_id, listener.clone())
            })
            .await?;

        debug!(couple_id, "Subscribed to messages");
        Ok(subscription)
    }

    /// Record a read receipt. Returns the timestamp written.
    pub async fn mark_as_read(&self, message_id: &str, user_id: &str) -> Result<DateTime<Utc>> {
        require_id(message_id, "message id")?;
        require_id(user_id, "user id")?;

        let at = Utc::now();
        let backend = self.backend.as_ref();
        self.retry
            .execute("mark_as_read", move || {
                backend.mark_as_read(message_id, user_id, at)
            })
            .await?;
        Ok(at)
    }

    pub async fn get_unread_count(&self, couple_id: &str, user_id: &str) -> Result<u64> {
        let backend = self.backend.as_ref();
        self.retry
            .execute("get_unread_count", move || {
                backend.get_unread_count(couple_id, user_id)
            })
            .await
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<()> {
        require_id(message_id, "message id")?;

        let backend = self.backend.as_ref();
        self.retry
            .execute("delete_message", move || backend.delete_message(message_id))
            .await
    }
}

fn require_id(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(TandemError::Validation(format!("{} must not be empty", what)))
    } else {
        Ok(())
    }
}

fn open_envelope(
    cipher: &CipherService,
    envelope: &StoredEnvelope,
    secret: &CoupleSecret,
) -> Result<Message> {
    let content = cipher.decrypt(&envelope.sealed(), secret)?;

    // The plaintext type tag must agree with the routing metadata
    if content.message_type() != envelope.message_type {
        return Err(TandemError::Decryption(format!(
            "content type {} does not match envelope type {}",
            content.message_type(),
            envelope.message_type
        )));
    }

    Ok(Message {
        id: envelope.id.clone(),
        couple_id: envelope.couple_id.clone(),
        sender_id: envelope.sender_id.clone(),
        message_type: envelope.message_type,
        content,
        created_at: envelope.created_at,
        read_at: envelope.read_at,
        read_by: envelope.read_by.clone(),
    })
}

fn decrypt_all(
    cipher: &CipherService,
    envelopes: &[StoredEnvelope],
    secret: &CoupleSecret,
) -> DecryptedBatch {
    let mut batch = DecryptedBatch::default();

    for envelope in envelopes {
        match open_envelope(cipher, envelope, secret) {
            Ok(message) => batch.messages.push(message),
            Err(error) => {
                warn!(envelope_id = %envelope.id, "Skipping envelope: {}", error);
                batch.failures.push(DecryptFailure {
                    envelope_id: envelope.id.clone(),
                    error,
                });
            }
        }
    }

    batch
        .messages
        .sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    batch
}
