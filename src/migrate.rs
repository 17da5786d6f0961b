//! One-shot migration of the legacy flat-file archive into the document
//! store, with dry-run, verification, and guarded rollback.
//!
//! The run is sequential on purpose: error ordering stays deterministic and
//! the store never sees concurrent writes for one conversation. Failures are
//! contained per item, a bad session or message is logged and counted, and
//! the run moves on.

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::HistoryConfig;
use crate::error::{Result, StoreError};
use crate::model::{
    Conversation, LegacyMessage, LegacySession, Message, MessageMetadata, MessageSender,
    SenderRole,
};
use crate::search::query::{QueryBuilder, SearchQuery};
use crate::store::{Collection, DocumentStore};

/// Out-of-band confirmation value required by [`MigrationEngine::rollback`].
pub const ROLLBACK_CONFIRMATION: &str = "CONFIRM_ROLLBACK_DELETE_ALL";

/// Most recent per-item errors kept in a run's stats.
const MAX_RECORDED_ERRORS: usize = 50;

const WRITE_ATTEMPTS: u32 = 3;
const WRITE_BACKOFF_MS: u64 = 50;

/// Verification samples this many sessions for a full message recount.
const VERIFY_SAMPLE_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    NotStarted,
    Running,
    Completed,
    CompletedWithErrors,
    RolledBack,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationError {
    /// Legacy session id (or `<unknown>` when the header was unreadable).
    pub item: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStats {
    pub sessions_seen: u64,
    pub sessions_migrated: u64,
    pub sessions_failed: u64,
    pub sessions_skipped: u64,
    pub messages_seen: u64,
    pub messages_migrated: u64,
    pub messages_failed: u64,
    /// Most recent [`MAX_RECORDED_ERRORS`] per-item errors; older ones are
    /// dropped, the counters above stay exact.
    pub errors: Vec<MigrationError>,
    pub duration_ms: u64,
    pub state: MigrationState,
}

impl MigrationStats {
    fn new() -> Self {
        Self {
            sessions_seen: 0,
            sessions_migrated: 0,
            sessions_failed: 0,
            sessions_skipped: 0,
            messages_seen: 0,
            messages_migrated: 0,
            messages_failed: 0,
            errors: Vec::new(),
            duration_ms: 0,
            state: MigrationState::Running,
        }
    }

    fn record_error(&mut self, item: &str, message: String) {
        if self.errors.len() >= MAX_RECORDED_ERRORS {
            self.errors.remove(0);
        }
        self.errors.push(MigrationError {
            item: item.to_string(),
            message,
            timestamp: crate::model::now_timestamp(),
        });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSample {
    pub session_id: String,
    pub legacy_messages: u64,
    pub migrated_messages: u64,
    pub matches: bool,
}

/// Outcome of [`MigrationEngine::verify`]. A sampling check, not a full
/// audit: session counts are exact, message recounts cover only the sample.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub legacy_sessions: u64,
    pub migrated_conversations: u64,
    pub counts_match: bool,
    pub samples: Vec<SessionSample>,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackStats {
    pub conversations_deleted: u64,
    pub messages_deleted: u64,
    pub errors: Vec<MigrationError>,
    pub duration_ms: u64,
}

/// Read-only view of the legacy archive: a `sessions.json` index next to one
/// `{session_id}.json` file per session.
#[derive(Debug, Clone)]
pub struct LegacyArchive {
    root: PathBuf,
}

impl LegacyArchive {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Session ids from the index, in index order. Entries may be bare id
    /// strings or objects carrying an `id` field.
    pub async fn session_ids(&self) -> Result<Vec<String>> {
        let index_path = self.root.join("sessions.json");
        let raw = tokio::fs::read_to_string(&index_path)
            .await
            .map_err(|e| StoreError::Other(format!("cannot read {}: {e}", index_path.display())))?;
        let index: Value = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Other(format!("malformed sessions.json: {e}")))?;
        let entries = index
            .as_array()
            .ok_or_else(|| StoreError::Other("sessions.json is not an array".into()))?;

        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = entry
                .as_str()
                .or_else(|| entry.get("id").and_then(Value::as_str));
            match id {
                Some(id) if !id.trim().is_empty() => ids.push(id.to_string()),
                _ => {
                    return Err(StoreError::Other(
                        "sessions.json entry without an id".into(),
                    ));
                }
            }
        }
        Ok(ids)
    }

    pub async fn load_session(&self, session_id: &str) -> Result<Value> {
        let path = self.root.join(format!("{session_id}.json"));
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| StoreError::Other(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| StoreError::Conversion {
            item: session_id.to_string(),
            reason: format!("session file is not valid JSON: {e}"),
        })
    }
}

/// Drives the archive-to-store migration for one tenant.
pub struct MigrationEngine<S> {
    store: Arc<S>,
    archive: LegacyArchive,
    builder: QueryBuilder,
    tenant_id: String,
    /// Owner credited as the human side of every migrated message.
    default_user_id: String,
    state: MigrationState,
}

impl<S: DocumentStore> MigrationEngine<S> {
    pub fn new(
        store: Arc<S>,
        archive: LegacyArchive,
        cfg: &HistoryConfig,
        tenant_id: &str,
        default_user_id: &str,
    ) -> Self {
        Self {
            store,
            archive,
            builder: QueryBuilder::new(cfg),
            tenant_id: tenant_id.to_string(),
            default_user_id: default_user_id.to_string(),
            state: MigrationState::NotStarted,
        }
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// Migrate every legacy session. With `dry_run` the full conversion runs
    /// and all counters are produced, but nothing is written.
    pub async fn migrate_all(&mut self, dry_run: bool) -> Result<MigrationStats> {
        let started = Instant::now();
        self.state = MigrationState::Running;
        let mut stats = MigrationStats::new();

        let ids = self.archive.session_ids().await?;
        info!(sessions = ids.len(), dry_run, "starting legacy migration");

        for session_id in &ids {
            stats.sessions_seen += 1;
            match self.migrate_session(session_id, dry_run, &mut stats).await {
                Ok(SessionOutcome::Migrated { messages }) => {
                    stats.sessions_migrated += 1;
                    stats.messages_migrated += messages;
                }
                Ok(SessionOutcome::Skipped) => {
                    stats.sessions_skipped += 1;
                    debug!(session_id, "already migrated, skipping");
                }
                Err(e) => {
                    stats.sessions_failed += 1;
                    stats.record_error(session_id, e.to_string());
                    warn!(session_id, error = %e, "session failed, continuing");
                }
            }
        }

        stats.duration_ms = duration_ms(started.elapsed());
        stats.state = if stats.sessions_failed > 0 || stats.messages_failed > 0 {
            MigrationState::CompletedWithErrors
        } else {
            MigrationState::Completed
        };
        self.state = stats.state;
        info!(
            sessions_migrated = stats.sessions_migrated,
            sessions_skipped = stats.sessions_skipped,
            sessions_failed = stats.sessions_failed,
            messages_migrated = stats.messages_migrated,
            messages_failed = stats.messages_failed,
            state = ?stats.state,
            "migration finished"
        );
        Ok(stats)
    }

    async fn migrate_session(
        &self,
        session_id: &str,
        dry_run: bool,
        stats: &mut MigrationStats,
    ) -> Result<SessionOutcome> {
        let raw = self.archive.load_session(session_id).await?;
        let (session, raw_messages) = LegacySession::from_value(&raw)?;

        // Conversation ids are derived from the legacy session id, so a
        // point read is all the idempotency check needs.
        let conv_id = format!("conv_{}", session.id);
        if self
            .store
            .read(Collection::Conversations, &conv_id, &self.tenant_id)
            .await?
            .is_some()
        {
            return Ok(SessionOutcome::Skipped);
        }

        let mut conversation = Conversation::new(
            &self.tenant_id,
            &session.id,
            if session.title.is_empty() {
                "Untitled session"
            } else {
                &session.title
            },
            &self.default_user_id,
            "User",
        );
        conversation.timeline.created_at = session.created_at.clone();
        conversation.timeline.last_message_at = session.created_at.clone();
        conversation.add_tag("migrated");
        conversation.add_tag(&session.mode);
        conversation.add_category(
            &format!("migrated_{}", session.mode),
            &format!("Migrated {}", session.mode),
            1.0,
            "migration",
        );

        let mut messages = Vec::with_capacity(raw_messages.len());
        let mut assistant_duration_total = 0.0_f64;
        let mut assistant_count = 0_u64;
        for raw_message in &raw_messages {
            stats.messages_seen += 1;
            let legacy = match LegacyMessage::from_value(raw_message, &session.id, &session.created_at)
            {
                Ok(m) => m,
                Err(e) => {
                    stats.messages_failed += 1;
                    stats.record_error(&session.id, e.to_string());
                    warn!(session_id, error = %e, "message quarantined");
                    continue;
                }
            };

            let sequence = messages.len() as u64 + 1;
            let metadata = MessageMetadata {
                mode: legacy
                    .metadata_str("mode")
                    .unwrap_or(&session.mode)
                    .to_string(),
                effort: legacy.metadata_str("effort").unwrap_or("").to_string(),
                duration: legacy.metadata_f64("duration").unwrap_or(0.0),
                tokens: legacy.metadata_u64("tokens").unwrap_or(0),
                model: legacy.metadata_str("model").unwrap_or("").to_string(),
            };

            conversation.metrics.total_tokens += metadata.tokens;
            conversation.metrics.total_duration += metadata.duration;
            let sender = self.sender_for(&legacy.role);
            if sender.role == SenderRole::Assistant {
                assistant_duration_total += metadata.duration;
                assistant_count += 1;
            }

            conversation.record_message(&legacy.content, &legacy.timestamp);
            messages.push(Message::new(
                &session.id,
                &self.tenant_id,
                sender,
                &legacy.content,
                &legacy.timestamp,
                sequence,
                metadata,
            ));
        }
        if assistant_count > 0 {
            conversation.metrics.avg_response_time =
                assistant_duration_total / assistant_count as f64;
        }

        let migrated = messages.len() as u64;
        if dry_run {
            return Ok(SessionOutcome::Migrated { messages: migrated });
        }

        // Messages first; the conversation doubles as the completion marker,
        // so a rerun after a partial write converges instead of skipping a
        // half-written session.
        for message in &messages {
            let doc = serde_json::to_value(message)?;
            self.upsert_with_retry(Collection::Messages, &doc).await?;
        }
        let doc = serde_json::to_value(&conversation)?;
        self.upsert_with_retry(Collection::Conversations, &doc)
            .await?;

        Ok(SessionOutcome::Migrated { messages: migrated })
    }

    /// Recount legacy vs migrated sessions, plus a full message recount on a
    /// bounded sample of sessions.
    pub async fn verify(&self) -> Result<VerificationReport> {
        let ids = self.archive.session_ids().await?;
        let mut migrated = 0_u64;
        for session_id in &ids {
            let conv_id = format!("conv_{session_id}");
            if self
                .store
                .read(Collection::Conversations, &conv_id, &self.tenant_id)
                .await?
                .is_some()
            {
                migrated += 1;
            }
        }

        let mut samples = Vec::new();
        for session_id in ids.iter().take(VERIFY_SAMPLE_SIZE) {
            let migrated_messages = self.count_migrated_messages(session_id).await?;
            // An unreadable sampled session is a mismatch in the report, not
            // a failure of the whole verification.
            let sample = match self.count_legacy_messages(session_id).await {
                Ok(legacy_messages) => SessionSample {
                    session_id: session_id.clone(),
                    legacy_messages,
                    migrated_messages,
                    matches: legacy_messages == migrated_messages,
                },
                Err(e) => {
                    warn!(session_id, error = %e, "sampled session unreadable, recorded as mismatch");
                    SessionSample {
                        session_id: session_id.clone(),
                        legacy_messages: 0,
                        migrated_messages,
                        matches: false,
                    }
                }
            };
            samples.push(sample);
        }

        let counts_match = migrated == ids.len() as u64;
        let report = VerificationReport {
            legacy_sessions: ids.len() as u64,
            migrated_conversations: migrated,
            counts_match,
            passed: counts_match && samples.iter().all(|s| s.matches),
            samples,
        };
        info!(
            legacy = report.legacy_sessions,
            migrated = report.migrated_conversations,
            passed = report.passed,
            "verification finished"
        );
        Ok(report)
    }

    /// Delete every migrated conversation and its messages. Destructive and
    /// unguarded beyond the confirmation value, which must be supplied
    /// out of band; anything else fails fast with no side effects.
    pub async fn rollback(&mut self, confirmation: &str) -> Result<RollbackStats> {
        if confirmation != ROLLBACK_CONFIRMATION {
            return Err(StoreError::ConfirmationRequired);
        }

        let started = Instant::now();
        let mut rollback = RollbackStats {
            conversations_deleted: 0,
            messages_deleted: 0,
            errors: Vec::new(),
            duration_ms: 0,
        };

        let ids = self.archive.session_ids().await?;
        warn!(sessions = ids.len(), "rolling back migrated data");
        for session_id in &ids {
            match self.rollback_session(session_id).await {
                Ok((conversations, messages)) => {
                    rollback.conversations_deleted += conversations;
                    rollback.messages_deleted += messages;
                }
                Err(e) => {
                    if rollback.errors.len() >= MAX_RECORDED_ERRORS {
                        rollback.errors.remove(0);
                    }
                    rollback.errors.push(MigrationError {
                        item: session_id.clone(),
                        message: e.to_string(),
                        timestamp: crate::model::now_timestamp(),
                    });
                    warn!(session_id, error = %e, "rollback failed for session, continuing");
                }
            }
        }

        rollback.duration_ms = duration_ms(started.elapsed());
        self.state = MigrationState::RolledBack;
        info!(
            conversations = rollback.conversations_deleted,
            messages = rollback.messages_deleted,
            errors = rollback.errors.len(),
            "rollback finished"
        );
        Ok(rollback)
    }

    /// Messages go first so an interrupted rollback never leaves orphaned
    /// messages behind a deleted conversation.
    async fn rollback_session(&self, session_id: &str) -> Result<(u64, u64)> {
        let mut messages_deleted = 0_u64;
        for message_id in self.message_ids(session_id).await? {
            self.store
                .delete(Collection::Messages, &message_id, session_id)
                .await?;
            messages_deleted += 1;
        }

        let conv_id = format!("conv_{session_id}");
        match self
            .store
            .delete(Collection::Conversations, &conv_id, &self.tenant_id)
            .await
        {
            Ok(()) => Ok((1, messages_deleted)),
            Err(StoreError::NotFound(_)) => Ok((0, messages_deleted)),
            Err(e) => Err(e),
        }
    }

    fn sender_for(&self, role: &str) -> MessageSender {
        match SenderRole::parse(role) {
            SenderRole::User => MessageSender {
                user_id: self.default_user_id.clone(),
                display_name: "User".into(),
                role: SenderRole::User,
            },
            SenderRole::Assistant => MessageSender {
                user_id: "assistant".into(),
                display_name: "Assistant".into(),
                role: SenderRole::Assistant,
            },
            SenderRole::System => MessageSender {
                user_id: "system".into(),
                display_name: "System".into(),
                role: SenderRole::System,
            },
            other => MessageSender {
                user_id: format!("{role}_user"),
                display_name: role.to_string(),
                role: other,
            },
        }
    }

    /// Convertible messages only; quarantined records were never written, so
    /// counting them would fail every partially-migrated session twice.
    async fn count_legacy_messages(&self, session_id: &str) -> Result<u64> {
        let raw = self.archive.load_session(session_id).await?;
        let (session, raw_messages) = LegacySession::from_value(&raw)?;
        let convertible = raw_messages
            .iter()
            .filter(|m| LegacyMessage::from_value(m, &session.id, &session.created_at).is_ok())
            .count();
        Ok(convertible as u64)
    }

    async fn count_migrated_messages(&self, session_id: &str) -> Result<u64> {
        Ok(self.message_ids(session_id).await?.len() as u64)
    }

    async fn message_ids(&self, session_id: &str) -> Result<Vec<String>> {
        let mut query = SearchQuery::for_tenant(&self.tenant_id);
        query.conversation_id = Some(session_id.to_string());
        let built = self.builder.build(&query, Collection::Messages)?;

        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .store
                .execute(Collection::Messages, &built, 100, cursor.as_deref())
                .await?;
            for item in &page.items {
                if let Some(id) = item.get("id").and_then(Value::as_str) {
                    ids.push(id.to_string());
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(ids)
    }

    async fn upsert_with_retry(&self, collection: Collection, doc: &Value) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.store.upsert(collection, doc).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < WRITE_ATTEMPTS => {
                    warn!(collection = collection.name(), attempt, error = %e, "retrying write");
                    tokio::time::sleep(Duration::from_millis(WRITE_BACKOFF_MS * u64::from(attempt)))
                        .await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

enum SessionOutcome {
    Migrated { messages: u64 },
    Skipped,
}

fn duration_ms(elapsed: Duration) -> u64 {
    elapsed.as_millis() as u64
}
