//! Typed documents stored in the two collections, plus the legacy ingestion
//! types consumed by the migration engine.

pub mod conversation;
pub mod legacy;
pub mod message;

pub use conversation::{
    CategoryAssignment, Conversation, ConversationMetrics, ConversationStatus,
    ConversationTimeline, Participant,
};
pub use legacy::{LegacyMessage, LegacySession};
pub use message::{Message, MessageContent, MessageMetadata, MessageSender, SenderRole};

use chrono::{DateTime, SecondsFormat, Utc};

/// Render a timestamp the way every document field stores one: UTC RFC 3339
/// with fixed millisecond precision, so string comparison orders correctly.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current instant in document form.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Lowercase, strip punctuation (unicode letters and digits survive), and
/// collapse runs of whitespace. Applied to every derived search-text field so
/// substring search sees one canonical form.
pub fn normalize_search_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate preview text to at most 100 characters (char-safe).
pub(crate) fn preview_of(content: &str) -> String {
    content.chars().take(100).collect()
}
