//! Conversation document: one record per chat session, partitioned by tenant.

use serde::{Deserialize, Serialize};

use super::{normalize_search_text, now_timestamp, preview_of};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    pub role: String,
    pub joined_at: String,
}

/// A category assignment with the confidence of whoever assigned it
/// (`manual`, `migration`, or `ai_classification`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAssignment {
    pub category_id: String,
    pub category_name: String,
    pub confidence: f64,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetrics {
    pub message_count: u64,
    pub participant_count: u64,
    pub total_tokens: u64,
    /// Summed per-message processing duration, seconds.
    pub total_duration: f64,
    /// Mean assistant response time, seconds.
    pub avg_response_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTimeline {
    pub created_at: String,
    pub updated_at: String,
    pub last_message_at: String,
    #[serde(default)]
    pub first_message_preview: String,
    #[serde(default)]
    pub last_message_preview: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
    Deleted,
}

/// Conversation document. Partition key: `tenantId`.
///
/// Two invariants are maintained here rather than in the store:
/// `metrics.message_count` tracks the number of message documents recorded
/// through [`Conversation::record_message`], and `timeline.updated_at` never
/// moves backwards (every mutation bumps it monotonically).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    pub conversation_id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub categories: Vec<CategoryAssignment>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metrics: ConversationMetrics,
    pub timeline: ConversationTimeline,
    #[serde(default)]
    pub searchable_text: String,
    pub status: ConversationStatus,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub bookmarked: bool,
    /// Optional per-item expiry, seconds from last write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl Conversation {
    /// Create a conversation with the creator as first participant.
    pub fn new(
        tenant_id: &str,
        conversation_id: &str,
        title: &str,
        creator_user_id: &str,
        creator_display_name: &str,
    ) -> Self {
        let now = now_timestamp();
        let creator = Participant {
            user_id: creator_user_id.to_string(),
            display_name: if creator_display_name.is_empty() {
                creator_user_id.to_string()
            } else {
                creator_display_name.to_string()
            },
            role: "user".into(),
            joined_at: now.clone(),
        };
        let mut conv = Self {
            id: format!("conv_{conversation_id}"),
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation_id.to_string(),
            title: title.to_string(),
            summary: String::new(),
            participants: vec![creator],
            categories: Vec::new(),
            tags: Vec::new(),
            metrics: ConversationMetrics {
                participant_count: 1,
                ..ConversationMetrics::default()
            },
            timeline: ConversationTimeline {
                created_at: now.clone(),
                updated_at: now.clone(),
                last_message_at: now,
                first_message_preview: String::new(),
                last_message_preview: String::new(),
            },
            searchable_text: String::new(),
            status: ConversationStatus::Active,
            archived: false,
            bookmarked: false,
            ttl: None,
        };
        conv.refresh_searchable_text();
        conv
    }

    /// Add a participant unless the user id is already present.
    pub fn add_participant(&mut self, user_id: &str, display_name: &str, role: &str) {
        if self.participants.iter().any(|p| p.user_id == user_id) {
            return;
        }
        self.participants.push(Participant {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            role: role.to_string(),
            joined_at: now_timestamp(),
        });
        self.metrics.participant_count = self.participants.len() as u64;
        self.refresh_searchable_text();
        self.touch(&now_timestamp());
    }

    /// Add a category assignment unless the category id is already present.
    pub fn add_category(
        &mut self,
        category_id: &str,
        category_name: &str,
        confidence: f64,
        source: &str,
    ) {
        if self.categories.iter().any(|c| c.category_id == category_id) {
            return;
        }
        self.categories.push(CategoryAssignment {
            category_id: category_id.to_string(),
            category_name: category_name.to_string(),
            confidence,
            source: source.to_string(),
        });
        self.refresh_searchable_text();
        self.touch(&now_timestamp());
    }

    /// Add a tag, deduplicated.
    pub fn add_tag(&mut self, tag: &str) {
        if self.tags.iter().any(|t| t == tag) {
            return;
        }
        self.tags.push(tag.to_string());
        self.refresh_searchable_text();
        self.touch(&now_timestamp());
    }

    pub fn set_summary(&mut self, summary: &str) {
        self.summary = summary.to_string();
        self.refresh_searchable_text();
        self.touch(&now_timestamp());
    }

    /// Fold one message into the aggregates: bump the count, refresh previews
    /// and `last_message_at`, and advance `updated_at`.
    pub fn record_message(&mut self, content: &str, timestamp: &str) {
        if self.metrics.message_count == 0 {
            self.timeline.first_message_preview = preview_of(content);
        }
        self.timeline.last_message_preview = preview_of(content);
        if timestamp > self.timeline.last_message_at.as_str() {
            self.timeline.last_message_at = timestamp.to_string();
        }
        self.metrics.message_count += 1;
        self.touch(timestamp);
    }

    /// Advance `updated_at`, never backwards. Wall clocks tie or regress;
    /// the invariant holds regardless.
    fn touch(&mut self, candidate: &str) {
        let now = now_timestamp();
        let latest = if candidate > now.as_str() { candidate } else { now.as_str() };
        if latest > self.timeline.updated_at.as_str() {
            self.timeline.updated_at = latest.to_string();
        }
    }

    /// Rebuild the precomputed lowercase search text from title, summary,
    /// participant names, category names, and tags. Message bodies are
    /// excluded; those are covered by message search.
    pub fn refresh_searchable_text(&mut self) {
        let mut parts: Vec<&str> = vec![&self.title, &self.summary];
        parts.extend(self.participants.iter().map(|p| p.display_name.as_str()));
        parts.extend(self.categories.iter().map(|c| c.category_name.as_str()));
        parts.extend(self.tags.iter().map(String::as_str));
        self.searchable_text = normalize_search_text(&parts.join(" "));
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }
}
