//! Conversation history store: partitioned document storage with typed
//! search, result caching, and legacy-archive migration.
//!
//! Conversations are partitioned by tenant id, messages by conversation id.
//! [`store::DocumentStore`] is the gateway to the backing database,
//! [`search::SearchService`] layers query building, caching, and retries on
//! top of it, and [`migrate::MigrationEngine`] moves the legacy flat-file
//! archive into the store.

pub mod config;
pub mod error;
pub mod migrate;
pub mod model;
pub mod search;
pub mod store;

use once_cell::sync::OnceCell;

pub use config::HistoryConfig;
pub use error::{Result, StoreError};
pub use migrate::{LegacyArchive, MigrationEngine, MigrationState, MigrationStats};
pub use model::{Conversation, Message};
pub use search::{SearchQuery, SearchResult, SearchService};
pub use store::{DocumentStore, sqlite::SqliteStore};

static TRACING: OnceCell<()> = OnceCell::new();

/// Install a process-wide tracing subscriber honoring `RUST_LOG`, defaulting
/// to `info`. Safe to call repeatedly; only the first call installs.
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .try_init();
    });
}
