//! Message content carried inside an encrypted envelope

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Plaintext message kind.
///
/// Duplicated in the envelope metadata so the backend can filter without
/// decrypting. The kind is not secret; the content is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    TaskRequest,
    TaskUpdate,
    EnergyBoost,
    MoodShare,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::TaskRequest => "task_request",
            MessageType::TaskUpdate => "task_update",
            MessageType::EnergyBoost => "energy_boost",
            MessageType::MoodShare => "mood_share",
            MessageType::System => "system",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured payload of a message. Exactly one variant per message.
///
/// Every variant carries `timestamp` in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    TaskRequest {
        task_id: String,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    TaskUpdate {
        task_id: String,
        title: String,
        text: String,
        timestamp: i64,
    },
    EnergyBoost {
        points: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        timestamp: i64,
    },
    MoodShare {
        mood: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        timestamp: i64,
    },
    System {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        timestamp: i64,
    },
}

/// Rejected content. Never worth retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("energy boost must carry at least one point")]
    NoPoints,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text {
            text: text.into(),
            timestamp: crate::now_millis(),
        }
    }

    pub fn task_request(
        task_id: impl Into<String>,
        title: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        MessageContent::TaskRequest {
            task_id: task_id.into(),
            title: title.into(),
            description,
            timestamp: crate::now_millis(),
        }
    }

    pub fn task_update(
        task_id: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        MessageContent::TaskUpdate {
            task_id: task_id.into(),
            title: title.into(),
            text: text.into(),
            timestamp: crate::now_millis(),
        }
    }

    pub fn energy_boost(points: u32, text: Option<String>) -> Self {
        MessageContent::EnergyBoost {
            points,
            text,
            timestamp: crate::now_millis(),
        }
    }

    pub fn mood_share(mood: impl Into<String>, text: Option<String>) -> Self {
        MessageContent::MoodShare {
            mood: mood.into(),
            text,
            timestamp: crate::now_millis(),
        }
    }

    pub fn system(event: impl Into<String>, text: Option<String>) -> Self {
        MessageContent::System {
            event: event.into(),
            text,
            timestamp: crate::now_millis(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            MessageContent::Text { .. } => MessageType::Text,
            MessageContent::TaskRequest { .. } => MessageType::TaskRequest,
            MessageContent::TaskUpdate { .. } => MessageType::TaskUpdate,
            MessageContent::EnergyBoost { .. } => MessageType::EnergyBoost,
            MessageContent::MoodShare { .. } => MessageType::MoodShare,
            MessageContent::System { .. } => MessageType::System,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            MessageContent::Text { timestamp, .. }
            | MessageContent::TaskRequest { timestamp, .. }
            | MessageContent::TaskUpdate { timestamp, .. }
            | MessageContent::EnergyBoost { timestamp, .. }
            | MessageContent::MoodShare { timestamp, .. }
            | MessageContent::System { timestamp, .. } => *timestamp,
        }
    }

    /// Short human-readable summary, used for previews and logs.
    pub fn preview(&self) -> String {
        match self {
            MessageContent::Text { text, .. } => text.clone(),
            MessageContent::TaskRequest { title, .. } => format!("Task request: {}", title),
            MessageContent::TaskUpdate { title, text, .. } => format!("{}: {}", title, text),
            MessageContent::EnergyBoost { points, text, .. } => match text {
                Some(text) => format!("+{} energy: {}", points, text),
                None => format!("+{} energy", points),
            },
            MessageContent::MoodShare { mood, text, .. } => match text {
                Some(text) => format!("Mood {}: {}", mood, text),
                None => format!("Mood {}", mood),
            },
            MessageContent::System { event, .. } => format!("[{}]", event),
        }
    }

    /// Reject content that should never reach the network.
    pub fn validate(&self) -> Result<(), ContentError> {
        fn required(value: &str, field: &'static str) -> Result<(), ContentError> {
            if value.trim().is_empty() {
                Err(ContentError::Empty(field))
            } else {
                Ok(())
            }
        }

        match self {
            MessageContent::Text { text, .. } => required(text, "text"),
            MessageContent::TaskRequest { task_id, title, .. } => {
                required(task_id, "taskId")?;
                required(title, "title")
            }
            MessageContent::TaskUpdate {
                task_id,
                title,
                text,
                ..
            } => {
                required(task_id, "taskId")?;
                required(title, "title")?;
                required(text, "text")
            }
            MessageContent::EnergyBoost { points, .. } => {
                if *points == 0 {
                    Err(ContentError::NoPoints)
                } else {
                    Ok(())
                }
            }
            MessageContent::MoodShare { mood, .. } => required(mood, "mood"),
            MessageContent::System { event, .. } => required(event, "event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_wire_shape() {
        let content = MessageContent::Text {
            text: "hello".to_string(),
            timestamp: 1_700_000_000_000,
        };

        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "text", "text": "hello", "timestamp": 1_700_000_000_000i64})
        );
    }

    #[test]
    fn test_task_request_uses_camel_case_fields() {
        let content = MessageContent::TaskRequest {
            task_id: "t-1".to_string(),
            title: "Dishes".to_string(),
            description: None,
            timestamp: 1,
        };

        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["type"], "task_request");
        assert_eq!(json["taskId"], "t-1");
        assert!(json.get("description").is_none());

        let parsed: MessageContent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, content);
    }

    #[test]
    fn test_message_type_matches_tag() {
        let content = MessageContent::MoodShare {
            mood: "calm".to_string(),
            text: None,
            timestamp: 5,
        };
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["type"], content.message_type().as_str());
        assert_eq!(content.timestamp(), 5);
    }

    #[test]
    fn test_validate() {
        let empty = MessageContent::Text {
            text: "   ".to_string(),
            timestamp: 0,
        };
        assert_eq!(empty.validate(), Err(ContentError::Empty("text")));

        let boost = MessageContent::EnergyBoost {
            points: 0,
            text: None,
            timestamp: 0,
        };
        assert_eq!(boost.validate(), Err(ContentError::NoPoints));

        let system = MessageContent::system("", None);
        assert_eq!(system.validate(), Err(ContentError::Empty("event")));

        let update = MessageContent::TaskUpdate {
            task_id: "t".to_string(),
            title: "Laundry".to_string(),
            text: "done".to_string(),
            timestamp: 0,
        };
        assert!(update.validate().is_ok());
    }

    #[test]
    fn test_constructors_stamp_current_time() {
        let before = crate::now_millis();
        let content = MessageContent::energy_boost(3, Some("you got this".to_string()));

        assert_eq!(content.message_type(), MessageType::EnergyBoost);
        assert!(content.timestamp() >= before);
        assert_eq!(content.preview(), "+3 energy: you got this");
    }
}
