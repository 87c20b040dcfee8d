//! Durable outbox state

use crate::{Result, TandemError};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tandem_types::{Message, MessageContent, MessageType, PendingMessage};

/// Current on-disk record layout
pub const SNAPSHOT_VERSION: u32 = 1;

/// In-memory outbox state to persist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboxSnapshot {
    pub messages: Vec<Message>,
    pub pending: Vec<PendingMessage>,
}

/// Storage for the outbox snapshot
#[async_trait]
pub trait OutboxPersistence: Send + Sync {
    /// Last saved snapshot, or `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<OutboxSnapshot>>;

    async fn save(&self, snapshot: &OutboxSnapshot) -> Result<()>;
}

/// Serialized form of [`OutboxSnapshot`]. Timestamps are epoch millis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub version: u32,
    pub messages: Vec<MessageRecord>,
    pub pending: Vec<PendingRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub couple_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: MessageContent,
    pub created_at: i64,
    #[serde(default)]
    pub read_at: Option<i64>,
    #[serde(default)]
    pub read_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRecord {
    pub local_id: String,
    pub couple_id: String,
    pub sender_id: String,
    pub content: MessageContent,
    pub created_at: i64,
    pub retry_count: u32,
}

fn from_millis(millis: i64, field: &str) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| TandemError::Storage(format!("invalid {} timestamp: {}", field, millis)))
}

impl From<&Message> for MessageRecord {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            couple_id: message.couple_id.clone(),
            sender_id: message.sender_id.clone(),
            message_type: message.message_type,
            content: message.content.clone(),
            created_at: message.created_at.timestamp_millis(),
            read_at: message.read_at.map(|t| t.timestamp_millis()),
            read_by: message.read_by.clone(),
        }
    }
}

impl TryFrom<MessageRecord> for Message {
    type Error = TandemError;

    fn try_from(record: MessageRecord) -> Result<Self> {
        Ok(Message {
            created_at: from_millis(record.created_at, "createdAt")?,
            read_at: record
                .read_at
                .map(|millis| from_millis(millis, "readAt"))
                .transpose()?,
            id: record.id,
            couple_id: record.couple_id,
            sender_id: record.sender_id,
            message_type: record.message_type,
            content: record.content,
            read_by: record.read_by,
        })
    }
}

impl From<&PendingMessage> for PendingRecord {
    fn from(pending: &PendingMessage) -> Self {
        Self {
            local_id: pending.local_id.clone(),
            couple_id: pending.couple_id.clone(),
            sender_id: pending.sender_id.clone(),
            content: pending.content.clone(),
            created_at: pending.created_at.timestamp_millis(),
            retry_count: pending.retry_count,
        }
    }
}

impl TryFrom<PendingRecord> for PendingMessage {
    type Error = TandemError;

    fn try_from(record: PendingRecord) -> Result<Self> {
        Ok(PendingMessage {
            created_at: from_millis(record.created_at, "createdAt")?,
            local_id: record.local_id,
            couple_id: record.couple_id,
            sender_id: record.sender_id,
            content: record.content,
            retry_count: record.retry_count,
        })
    }
}

impl SnapshotRecord {
    pub fn encode(snapshot: &OutboxSnapshot) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            messages: snapshot.messages.iter().map(MessageRecord::from).collect(),
            pending: snapshot.pending.iter().map(PendingRecord::from).collect(),
        }
    }

    pub fn decode(self) -> Result<OutboxSnapshot> {
        if self.version != SNAPSHOT_VERSION {
            return Err(TandemError::Storage(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }

        Ok(OutboxSnapshot {
            messages: self
                .messages
                .into_iter()
                .map(Message::try_from)
                .collect::<Result<_>>()?,
            pending: self
                .pending
                .into_iter()
                .map(PendingMessage::try_from)
                .collect::<Result<_>>()?,
        })
    }
}
