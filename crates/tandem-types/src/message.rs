//! Client-side message records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageContent, MessageType};

/// A confirmed, decrypted message.
///
/// `id` is assigned by the backend. Only `read_at`/`read_by` change after
/// creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub couple_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_by: Option<String>,
}

impl Message {
    /// Unread from `user_id`'s point of view: sent by the partner and not
    /// yet acknowledged. A user's own messages never count.
    pub fn is_unread_for(&self, user_id: &str) -> bool {
        self.sender_id != user_id && self.read_at.is_none()
    }

    pub fn mark_read(&mut self, user_id: &str, at: DateTime<Utc>) {
        self.read_at = Some(at);
        self.read_by = Some(user_id.to_string());
    }
}

/// Number of messages in `messages` that are unread for `user_id`.
pub fn unread_count(messages: &[Message], user_id: &str) -> usize {
    messages.iter().filter(|m| m.is_unread_for(user_id)).count()
}

/// A composed message not yet confirmed by the backend.
///
/// `local_id` never leaves the sending device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub local_id: String,
    pub couple_id: String,
    pub sender_id: String,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl PendingMessage {
    pub fn new(
        couple_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: MessageContent,
    ) -> Self {
        Self {
            local_id: format!("local-{}", uuid::Uuid::new_v4()),
            couple_id: couple_id.into(),
            sender_id: sender_id.into(),
            content,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.content.message_type()
    }
}
