//! Message document: one record per chat turn, partitioned by conversation.

use serde::{Deserialize, Serialize};

use super::normalize_search_text;

/// Sender roles seen across sessions. Unknown labels round-trip untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SenderRole {
    User,
    Assistant,
    System,
    Other(String),
}

impl SenderRole {
    pub fn as_str(&self) -> &str {
        match self {
            SenderRole::User => "user",
            SenderRole::Assistant => "assistant",
            SenderRole::System => "system",
            SenderRole::Other(s) => s,
        }
    }

    pub fn parse(label: &str) -> Self {
        match label {
            "user" => SenderRole::User,
            "assistant" => SenderRole::Assistant,
            "system" => SenderRole::System,
            other => SenderRole::Other(other.to_string()),
        }
    }
}

impl Serialize for SenderRole {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SenderRole {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let label = String::deserialize(d)?;
        Ok(SenderRole::parse(&label))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    pub user_id: String,
    pub display_name: String,
    pub role: SenderRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    pub text: String,
    /// Derived, normalized lowercase form; the only field keyword search on
    /// messages looks at.
    pub searchable_text: String,
}

impl MessageContent {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            searchable_text: normalize_search_text(text),
        }
    }
}

/// Free-form technical metadata carried through from the producing pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub effort: String,
    /// Processing duration, seconds.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub model: String,
}

/// Message document. Partition key: `conversationId`.
///
/// `sequence_number` is unique and strictly increasing within one
/// conversation and defines canonical ordering; wall-clock timestamps may tie.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub tenant_id: String,
    pub sender: MessageSender,
    pub content: MessageContent,
    pub timestamp: String,
    pub sequence_number: u64,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversation_id: &str,
        tenant_id: &str,
        sender: MessageSender,
        text: &str,
        timestamp: &str,
        sequence_number: u64,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            id: format!("msg_{conversation_id}_{sequence_number:08}"),
            conversation_id: conversation_id.to_string(),
            tenant_id: tenant_id.to_string(),
            sender,
            content: MessageContent::new(text),
            timestamp: timestamp.to_string(),
            sequence_number,
            metadata,
            parent_message_id: None,
            ttl: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(role: SenderRole) -> MessageSender {
        MessageSender {
            user_id: "u1".into(),
            display_name: "Alice".into(),
            role,
        }
    }

    #[test]
    fn content_derives_normalized_search_text() {
        let m = Message::new(
            "c1",
            "t1",
            sender(SenderRole::User),
            "Hello, Cosmos DB!",
            "2025-07-19T10:00:00.000Z",
            1,
            MessageMetadata::default(),
        );
        assert_eq!(m.content.searchable_text, "hello cosmos db");
        assert_eq!(m.id, "msg_c1_00000001");
    }

    #[test]
    fn roles_round_trip_including_unknown_labels() {
        for label in ["user", "assistant", "system", "moderator"] {
            let role = SenderRole::parse(label);
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{label}\""));
            let back: SenderRole = serde_json::from_str(&json).unwrap();
            assert_eq!(back, role);
        }
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let m = Message::new(
            "c1",
            "t1",
            sender(SenderRole::Assistant),
            "hi",
            "2025-07-19T10:00:00.000Z",
            3,
            MessageMetadata::default(),
        );
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["conversationId"], "c1");
        assert_eq!(v["sequenceNumber"], 3);
        assert_eq!(v["sender"]["role"], "assistant");
        assert!(v["content"].get("searchableText").is_some());
    }
}
