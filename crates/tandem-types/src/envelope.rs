//! Encrypted-at-rest wire representation of a message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MessageType;

/// Output of a single encryption call.
///
/// Both fields are standard base64. `iv` decodes to exactly 12 bytes on the
/// AES-GCM path and is never reused for the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub ciphertext: String,
    pub iv: String,
}

/// Plaintext routing metadata stored next to the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub message_type: MessageType,
    pub has_attachment: bool,
}

impl EnvelopeMetadata {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            has_attachment: false,
        }
    }
}

/// Payload of the backend `create` primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEnvelope {
    pub couple_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub encrypted_content: String,
    pub iv: String,
    pub metadata: EnvelopeMetadata,
}

impl NewEnvelope {
    pub fn new(
        couple_id: impl Into<String>,
        sender_id: impl Into<String>,
        message_type: MessageType,
        sealed: EncryptedEnvelope,
    ) -> Self {
        Self {
            couple_id: couple_id.into(),
            sender_id: sender_id.into(),
            message_type,
            encrypted_content: sealed.ciphertext,
            iv: sealed.iv,
            metadata: EnvelopeMetadata::new(message_type),
        }
    }
}

/// Envelope as persisted and served by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEnvelope {
    pub id: String,
    pub couple_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub encrypted_content: String,
    pub iv: String,
    pub metadata: EnvelopeMetadata,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_by: Option<String>,
}

impl StoredEnvelope {
    /// Materialize a created envelope with its backend-assigned id.
    pub fn from_new(id: impl Into<String>, envelope: NewEnvelope, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            couple_id: envelope.couple_id,
            sender_id: envelope.sender_id,
            message_type: envelope.message_type,
            encrypted_content: envelope.encrypted_content,
            iv: envelope.iv,
            metadata: envelope.metadata,
            created_at,
            read_at: None,
            read_by: None,
        }
    }

    /// The ciphertext half of the record.
    pub fn sealed(&self) -> EncryptedEnvelope {
        EncryptedEnvelope {
            ciphertext: self.encrypted_content.clone(),
            iv: self.iv.clone(),
        }
    }
}
