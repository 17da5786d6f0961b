//! Legacy flat-file records: loosely-typed session data validated at
//! ingestion.
//!
//! The legacy archive stores one JSON object per session (`session_info`
//! header plus a `messages` array) with whatever keys the old pipeline felt
//! like writing. Malformed shapes are rejected here with
//! [`StoreError::Conversion`] so they land in the migration run's error list
//! instead of leaking into the typed documents.

use serde_json::Value;

use crate::error::StoreError;

/// Validated legacy session header.
#[derive(Debug, Clone)]
pub struct LegacySession {
    pub id: String,
    pub title: String,
    pub mode: String,
    pub created_at: String,
    pub updated_at: String,
    pub messages: Vec<LegacyMessage>,
}

/// Validated legacy message.
#[derive(Debug, Clone)]
pub struct LegacyMessage {
    pub role: String,
    pub content: String,
    pub timestamp: String,
    /// Free-form metadata map carried through as-is (mode, effort, duration,
    /// tokens, model, ...).
    pub metadata: Value,
}

fn conversion(item: &str, reason: impl Into<String>) -> StoreError {
    StoreError::Conversion {
        item: item.to_string(),
        reason: reason.into(),
    }
}

fn required_str<'v>(obj: &'v Value, key: &str, item: &str) -> Result<&'v str, StoreError> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| conversion(item, format!("missing or empty field {key:?}")))
}

impl LegacySession {
    /// Validate a raw session document (`session_info` + `messages`).
    ///
    /// Header problems fail the whole session. Message validation is left to
    /// [`LegacyMessage::from_value`] so the caller can quarantine individual
    /// messages without losing the session.
    pub fn from_value(raw: &Value) -> Result<(Self, Vec<Value>), StoreError> {
        let info = raw
            .get("session_info")
            .and_then(Value::as_object)
            .ok_or_else(|| conversion("<unknown>", "session_info header missing"))?;
        let info = Value::Object(info.clone());

        let id = required_str(&info, "id", "<unknown>")?.to_string();
        let title = info
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let mode = info
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let created_at = required_str(&info, "created_at", &id)?.to_string();
        let updated_at = info
            .get("updated_at")
            .and_then(Value::as_str)
            .unwrap_or(created_at.as_str())
            .to_string();

        let raw_messages = raw
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| conversion(&id, "messages array missing"))?;

        Ok((
            Self {
                id,
                title,
                mode,
                created_at,
                updated_at,
                messages: Vec::new(),
            },
            raw_messages,
        ))
    }
}

impl LegacyMessage {
    /// Validate one raw message belonging to `session_id`.
    ///
    /// A missing timestamp, or a timestamp earlier than the session's
    /// creation time, is a conversion error: the record is quarantined rather
    /// than repaired with a guessed value.
    pub fn from_value(
        raw: &Value,
        session_id: &str,
        session_created_at: &str,
    ) -> Result<Self, StoreError> {
        let role = required_str(raw, "role", session_id)?.to_string();
        let content = raw
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| conversion(session_id, "message content missing"))?
            .to_string();
        let timestamp = required_str(raw, "timestamp", session_id)?.to_string();
        if timestamp.as_str() < session_created_at {
            return Err(conversion(
                session_id,
                format!(
                    "message timestamp {timestamp} predates session creation {session_created_at}"
                ),
            ));
        }
        Ok(Self {
            role,
            content,
            timestamp,
            metadata: raw.get("metadata").cloned().unwrap_or(Value::Null),
        })
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Value::as_f64)
    }

    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(Value::as_u64)
    }
}
