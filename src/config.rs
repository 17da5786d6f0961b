//! Externally-supplied configuration surface.
//!
//! The subsystem consumes (never owns) its configuration: store location,
//! database/collection names, cache tuning, and page-size bounds. Values come
//! from `CHAT_HISTORY_*` environment variables with sensible defaults, the
//! same way the surrounding application wires everything else.

use anyhow::{Result, bail};
use std::path::PathBuf;

/// Default result-cache TTL in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
/// Default result-cache capacity (entries).
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 100;
/// Default page size applied when a query asks for zero.
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Hard upper bound on page size; requests above it are clamped.
pub const DEFAULT_MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Path to the backing database file.
    pub db_path: PathBuf,
    /// Logical database name recorded in store metadata.
    pub database_name: String,
    /// Collection holding conversations, partitioned by tenant id.
    pub conversations_collection: String,
    /// Collection holding messages, partitioned by conversation id.
    pub messages_collection: String,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("chat_history.db"),
            database_name: "chat_history_db".into(),
            conversations_collection: "conversations".into(),
            messages_collection: "messages".into(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl HistoryConfig {
    /// Load from the environment, falling back to defaults. A `.env` file is
    /// honored when present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();
        if let Ok(path) = std::env::var("CHAT_HISTORY_DB_PATH") {
            cfg.db_path = PathBuf::from(path);
        }
        if let Ok(name) = std::env::var("CHAT_HISTORY_DATABASE_NAME") {
            cfg.database_name = name;
        }
        if let Ok(name) = std::env::var("CHAT_HISTORY_CONVERSATIONS_COLLECTION") {
            cfg.conversations_collection = name;
        }
        if let Ok(name) = std::env::var("CHAT_HISTORY_MESSAGES_COLLECTION") {
            cfg.messages_collection = name;
        }
        if let Ok(v) = std::env::var("CHAT_HISTORY_CACHE_TTL_SECS") {
            cfg.cache_ttl_secs = v.parse()?;
        }
        if let Ok(v) = std::env::var("CHAT_HISTORY_CACHE_MAX_ENTRIES") {
            cfg.cache_max_entries = v.parse()?;
        }
        if let Ok(v) = std::env::var("CHAT_HISTORY_DEFAULT_PAGE_SIZE") {
            cfg.default_page_size = v.parse()?;
        }
        if let Ok(v) = std::env::var("CHAT_HISTORY_MAX_PAGE_SIZE") {
            cfg.max_page_size = v.parse()?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the store cannot operate with.
    pub fn validate(&self) -> Result<()> {
        for name in [
            &self.database_name,
            &self.conversations_collection,
            &self.messages_collection,
        ] {
            if !is_valid_identifier(name) {
                bail!("invalid collection/database name: {name:?}");
            }
        }
        if self.conversations_collection == self.messages_collection {
            bail!("conversations and messages collections must differ");
        }
        if self.default_page_size == 0 || self.max_page_size == 0 {
            bail!("page sizes must be non-zero");
        }
        if self.default_page_size > self.max_page_size {
            bail!(
                "default page size {} exceeds maximum {}",
                self.default_page_size,
                self.max_page_size
            );
        }
        Ok(())
    }
}

/// Collection names end up in store-native statements, so they are restricted
/// to identifier characters.
fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "chat-history-store", "chat-history-store")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}
