//! Migration scenarios against a real backing database: partial failure,
//! idempotent reruns, dry runs, verification, and guarded rollback.

use std::sync::Arc;

use serde_json::{Value, json};
use tempfile::TempDir;

use chat_history_store::config::HistoryConfig;
use chat_history_store::error::StoreError;
use chat_history_store::migrate::{
    LegacyArchive, MigrationEngine, MigrationState, ROLLBACK_CONFIRMATION,
};
use chat_history_store::model::SenderRole;
use chat_history_store::search::{SearchQuery, SearchService, SortField, SortOrder};
use chat_history_store::store::sqlite::SqliteStore;
use chat_history_store::store::{Collection, DocumentStore};

const TENANT: &str = "tenant-1";
const USER: &str = "u-legacy";

fn config(dir: &TempDir) -> HistoryConfig {
    HistoryConfig {
        db_path: dir.path().join("history.db"),
        ..HistoryConfig::default()
    }
}

fn legacy_message(role: &str, content: &str, timestamp: &str) -> Value {
    json!({
        "role": role,
        "content": content,
        "timestamp": timestamp,
        "metadata": {"mode": "reasoning", "tokens": 10, "duration": 1.5, "model": "m-1"}
    })
}

fn legacy_session(id: &str, title: &str, message_count: usize) -> Value {
    let messages: Vec<Value> = (0..message_count)
        .map(|i| {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            legacy_message(
                role,
                &format!("message {i}"),
                &format!("2025-07-19T10:00:{i:02}.000Z"),
            )
        })
        .collect();
    json!({
        "session_info": {
            "id": id,
            "title": title,
            "mode": "reasoning",
            "created_at": "2025-07-19T10:00:00.000Z",
            "updated_at": "2025-07-19T11:00:00.000Z"
        },
        "messages": messages
    })
}

fn write_archive(dir: &std::path::Path, sessions: &[(&str, &Value)]) {
    let index: Vec<&str> = sessions.iter().map(|(id, _)| *id).collect();
    std::fs::write(
        dir.join("sessions.json"),
        serde_json::to_string(&index).unwrap(),
    )
    .unwrap();
    for (id, body) in sessions {
        std::fs::write(
            dir.join(format!("{id}.json")),
            serde_json::to_string(body).unwrap(),
        )
        .unwrap();
    }
}

async fn engine_for(
    store_dir: &TempDir,
    archive_dir: &TempDir,
) -> (MigrationEngine<SqliteStore>, Arc<SqliteStore>, HistoryConfig) {
    chat_history_store::init_tracing();
    let cfg = config(store_dir);
    let store = Arc::new(SqliteStore::open(cfg.clone()).unwrap());
    store.ensure_collections().await.unwrap();
    let engine = MigrationEngine::new(
        store.clone(),
        LegacyArchive::new(archive_dir.path()),
        &cfg,
        TENANT,
        USER,
    );
    (engine, store, cfg)
}

#[tokio::test]
async fn partial_failure_migrates_the_healthy_sessions() {
    let store_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let good_a = legacy_session("s1", "first", 2);
    let broken = json!({"session_info": {"title": "headless"}, "messages": []});
    let good_b = legacy_session("s3", "third", 5);
    write_archive(
        archive_dir.path(),
        &[("s1", &good_a), ("s2", &broken), ("s3", &good_b)],
    );

    let (mut engine, _store, _cfg) = engine_for(&store_dir, &archive_dir).await;
    let stats = engine.migrate_all(false).await.unwrap();

    assert_eq!(stats.sessions_seen, 3);
    assert_eq!(stats.sessions_migrated, 2);
    assert_eq!(stats.sessions_failed, 1);
    assert_eq!(stats.sessions_skipped, 0);
    assert_eq!(stats.messages_migrated, 7);
    assert_eq!(stats.messages_failed, 0);
    assert_eq!(stats.state, MigrationState::CompletedWithErrors);
    assert_eq!(stats.errors.len(), 1);
    assert_eq!(stats.errors[0].item, "s2");
}

#[tokio::test]
async fn quarantined_messages_fail_without_failing_the_session() {
    let store_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let mut session = legacy_session("s1", "mixed", 2);
    // Timestamp predating the session's creation is quarantined, not fixed.
    session["messages"]
        .as_array_mut()
        .unwrap()
        .push(legacy_message("user", "too old", "2025-07-18T09:00:00.000Z"));
    write_archive(archive_dir.path(), &[("s1", &session)]);

    let (mut engine, store, cfg) = engine_for(&store_dir, &archive_dir).await;
    let stats = engine.migrate_all(false).await.unwrap();

    assert_eq!(stats.sessions_migrated, 1);
    assert_eq!(stats.sessions_failed, 0);
    assert_eq!(stats.messages_seen, 3);
    assert_eq!(stats.messages_migrated, 2);
    assert_eq!(stats.messages_failed, 1);
    assert_eq!(stats.state, MigrationState::CompletedWithErrors);

    // Survivors keep contiguous sequence numbers.
    let svc = SearchService::new(store, &cfg);
    let mut query = SearchQuery::for_tenant(TENANT);
    query.conversation_id = Some("s1".into());
    query.sort_field = SortField::SequenceNumber;
    query.sort_order = SortOrder::Asc;
    let result = svc.search_messages(&query).await.unwrap();
    let sequences: Vec<u64> = result.items.iter().map(|m| m.sequence_number).collect();
    assert_eq!(sequences, vec![1, 2]);
}

#[tokio::test]
async fn rerun_skips_already_migrated_sessions() {
    let store_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let session = legacy_session("s1", "once", 3);
    write_archive(archive_dir.path(), &[("s1", &session)]);

    let (mut engine, _store, _cfg) = engine_for(&store_dir, &archive_dir).await;
    let first = engine.migrate_all(false).await.unwrap();
    assert_eq!(first.sessions_migrated, 1);
    assert_eq!(first.state, MigrationState::Completed);

    let second = engine.migrate_all(false).await.unwrap();
    assert_eq!(second.sessions_migrated, 0);
    assert_eq!(second.sessions_skipped, 1);
    assert_eq!(second.messages_migrated, 0);
    assert_eq!(second.state, MigrationState::Completed);
}

#[tokio::test]
async fn dry_run_counts_everything_and_writes_nothing() {
    let store_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let session = legacy_session("s1", "phantom", 4);
    write_archive(archive_dir.path(), &[("s1", &session)]);

    let (mut engine, store, _cfg) = engine_for(&store_dir, &archive_dir).await;
    let stats = engine.migrate_all(true).await.unwrap();

    assert_eq!(stats.sessions_migrated, 1);
    assert_eq!(stats.messages_migrated, 4);

    let health = store.health_check().await.unwrap();
    assert!(health.healthy);
    assert!(
        store
            .read(Collection::Conversations, "conv_s1", TENANT)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn migrated_conversation_carries_tags_category_and_metrics() {
    let store_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let session = legacy_session("s1", "tagged", 4);
    write_archive(archive_dir.path(), &[("s1", &session)]);

    let (mut engine, store, cfg) = engine_for(&store_dir, &archive_dir).await;
    engine.migrate_all(false).await.unwrap();

    let svc = SearchService::new(store, &cfg);
    let result = svc
        .search_conversations(&SearchQuery::for_tenant(TENANT))
        .await
        .unwrap();
    assert_eq!(result.items.len(), 1);
    let conv = &result.items[0];

    assert_eq!(conv.title, "tagged");
    assert!(conv.tags.iter().any(|t| t == "migrated"));
    assert!(conv.tags.iter().any(|t| t == "reasoning"));
    let category = &conv.categories[0];
    assert_eq!(category.category_id, "migrated_reasoning");
    assert_eq!(category.source, "migration");
    assert!((category.confidence - 1.0).abs() < f64::EPSILON);

    assert_eq!(conv.metrics.message_count, 4);
    assert_eq!(conv.metrics.total_tokens, 40);
    assert!((conv.metrics.total_duration - 6.0).abs() < 1e-9);
    // Two assistant messages at 1.5s each.
    assert!((conv.metrics.avg_response_time - 1.5).abs() < 1e-9);
    assert_eq!(conv.timeline.created_at, "2025-07-19T10:00:00.000Z");
}

#[tokio::test]
async fn migrated_messages_preserve_order_and_roles() {
    let store_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let session = legacy_session("s1", "ordered", 3);
    write_archive(archive_dir.path(), &[("s1", &session)]);

    let (mut engine, store, cfg) = engine_for(&store_dir, &archive_dir).await;
    engine.migrate_all(false).await.unwrap();

    let svc = SearchService::new(store, &cfg);
    let mut query = SearchQuery::for_tenant(TENANT);
    query.conversation_id = Some("s1".into());
    query.sort_field = SortField::SequenceNumber;
    query.sort_order = SortOrder::Asc;
    let result = svc.search_messages(&query).await.unwrap();

    assert_eq!(result.items.len(), 3);
    let roles: Vec<&SenderRole> = result.items.iter().map(|m| &m.sender.role).collect();
    assert_eq!(
        roles,
        vec![&SenderRole::User, &SenderRole::Assistant, &SenderRole::User]
    );
    assert_eq!(result.items[0].content.text, "message 0");
    assert_eq!(result.items[0].sender.user_id, USER);
    assert_eq!(result.items[1].sender.user_id, "assistant");
    assert_eq!(result.items[2].content.text, "message 2");
}

#[tokio::test]
async fn verify_reports_counts_and_samples() {
    let store_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let sessions: Vec<(String, Value)> = (0..5)
        .map(|i| (format!("s{i}"), legacy_session(&format!("s{i}"), "v", i + 1)))
        .collect();
    let refs: Vec<(&str, &Value)> = sessions.iter().map(|(id, v)| (id.as_str(), v)).collect();
    write_archive(archive_dir.path(), &refs);

    let (mut engine, _store, _cfg) = engine_for(&store_dir, &archive_dir).await;
    engine.migrate_all(false).await.unwrap();

    let report = engine.verify().await.unwrap();
    assert_eq!(report.legacy_sessions, 5);
    assert_eq!(report.migrated_conversations, 5);
    assert!(report.counts_match);
    assert_eq!(report.samples.len(), 3);
    assert!(report.samples.iter().all(|s| s.matches));
    assert!(report.passed);
}

#[tokio::test]
async fn verify_flags_a_missing_conversation() {
    let store_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let s1 = legacy_session("s1", "kept", 2);
    let s2 = legacy_session("s2", "lost", 2);
    write_archive(archive_dir.path(), &[("s1", &s1), ("s2", &s2)]);

    let (mut engine, store, _cfg) = engine_for(&store_dir, &archive_dir).await;
    engine.migrate_all(false).await.unwrap();
    store
        .delete(Collection::Conversations, "conv_s2", TENANT)
        .await
        .unwrap();

    let report = engine.verify().await.unwrap();
    assert_eq!(report.migrated_conversations, 1);
    assert!(!report.counts_match);
    assert!(!report.passed);
}

#[tokio::test]
async fn verify_still_reports_when_a_sampled_session_is_malformed() {
    let store_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let good = legacy_session("s1", "kept", 2);
    let headless = json!({"session_info": {"title": "no id"}, "messages": []});
    write_archive(archive_dir.path(), &[("s1", &good), ("s2", &headless)]);

    let (mut engine, _store, _cfg) = engine_for(&store_dir, &archive_dir).await;
    let stats = engine.migrate_all(false).await.unwrap();
    assert_eq!(stats.sessions_failed, 1);

    // The broken session sits inside the sample window and must not abort
    // the report.
    let report = engine.verify().await.unwrap();
    assert_eq!(report.legacy_sessions, 2);
    assert_eq!(report.migrated_conversations, 1);
    assert!(!report.counts_match);
    assert_eq!(report.samples.len(), 2);

    let good_sample = report.samples.iter().find(|s| s.session_id == "s1").unwrap();
    assert!(good_sample.matches);
    let broken_sample = report.samples.iter().find(|s| s.session_id == "s2").unwrap();
    assert!(!broken_sample.matches);
    assert!(!report.passed);
}

#[tokio::test]
async fn rollback_requires_the_confirmation_value() {
    let store_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let session = legacy_session("s1", "guarded", 2);
    write_archive(archive_dir.path(), &[("s1", &session)]);

    let (mut engine, store, _cfg) = engine_for(&store_dir, &archive_dir).await;
    engine.migrate_all(false).await.unwrap();

    let err = engine.rollback("yes please").await.unwrap_err();
    assert!(matches!(err, StoreError::ConfirmationRequired));

    // No side effects from the refused attempt.
    assert!(
        store
            .read(Collection::Conversations, "conv_s1", TENANT)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn rollback_deletes_messages_and_conversations() {
    let store_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let s1 = legacy_session("s1", "one", 2);
    let s2 = legacy_session("s2", "two", 3);
    write_archive(archive_dir.path(), &[("s1", &s1), ("s2", &s2)]);

    let (mut engine, store, _cfg) = engine_for(&store_dir, &archive_dir).await;
    engine.migrate_all(false).await.unwrap();

    let rollback = engine.rollback(ROLLBACK_CONFIRMATION).await.unwrap();
    assert_eq!(rollback.conversations_deleted, 2);
    assert_eq!(rollback.messages_deleted, 5);
    assert!(rollback.errors.is_empty());
    assert_eq!(engine.state(), MigrationState::RolledBack);

    assert!(
        store
            .read(Collection::Conversations, "conv_s1", TENANT)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        store
            .read(Collection::Messages, "msg_s2_00000001", "s2")
            .await
            .unwrap()
            .is_none()
    );

    // A fresh migration after rollback starts clean.
    let stats = engine.migrate_all(false).await.unwrap();
    assert_eq!(stats.sessions_migrated, 2);
    assert_eq!(stats.sessions_skipped, 0);
}
