//! Store gateway: the only layer that talks to the document store.
//!
//! Everything above this module sees an opaque partitioned document service:
//! JSON documents addressed by id + partition key, a parameterized query
//! surface, and opaque continuation cursors. The concrete backend lives in
//! [`sqlite`].

pub mod sqlite;

pub use sqlite::SqliteStore;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// The two logical collections and their partitioning schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Partitioned by owner/tenant id.
    Conversations,
    /// Partitioned by conversation id.
    Messages,
}

impl Collection {
    /// Stable name used in cache keys and logs (not the backing table name,
    /// which is configuration).
    pub fn name(self) -> &'static str {
        match self {
            Collection::Conversations => "conversations",
            Collection::Messages => "messages",
        }
    }

    /// Document field holding the partition key.
    pub fn partition_key_field(self) -> &'static str {
        match self {
            Collection::Conversations => "tenantId",
            Collection::Messages => "conversationId",
        }
    }
}

/// A query parameter value. Kept deliberately small; the store's query
/// surface only ever compares text, integers, and reals.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Int(i64),
    Real(f64),
}

/// A store-native query: parameterized statement text plus its named
/// parameters, and whether an equality filter pins the partition key (a
/// pinned query must not fan out across partitions).
#[derive(Debug, Clone)]
pub struct StoreQuery {
    pub sql: String,
    pub params: Vec<(String, ParamValue)>,
    pub partition_pinned: bool,
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub items: Vec<Value>,
    /// Opaque cursor for the next page; `None` when exhausted. Callers must
    /// pass the exact value back unmodified.
    pub next_cursor: Option<String>,
}

/// Gateway health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub database: String,
    /// Per-collection status: `"healthy"` or an error description.
    pub collections: Vec<(String, String)>,
}

/// The document store contract.
///
/// Transient failures (throttling, lock contention, timeouts) surface as
/// [`StoreError::Transient`]; retry/backoff is the caller's responsibility so
/// read and write paths can apply different policies.
pub trait DocumentStore: Send + Sync {
    /// Idempotent collection/index creation. Safe to call when the
    /// collections already exist; never recreates.
    fn ensure_collections(&self) -> impl Future<Output = Result<()>> + Send;

    /// Execute a query, returning at most `page_size` items and a cursor for
    /// the following page. `cursor` of `None` means first page.
    fn execute(
        &self,
        collection: Collection,
        query: &StoreQuery,
        page_size: usize,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<QueryPage>> + Send;

    /// Insert or replace a document. The partition key is taken from the
    /// document's own partition field.
    fn upsert(&self, collection: Collection, doc: &Value) -> impl Future<Output = Result<()>> + Send;

    /// Point read by id within one partition. Never fans out.
    fn read(
        &self,
        collection: Collection,
        id: &str,
        partition_key: &str,
    ) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Delete by id within one partition. `NotFound` when absent.
    fn delete(
        &self,
        collection: Collection,
        id: &str,
        partition_key: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn health_check(&self) -> impl Future<Output = Result<HealthStatus>> + Send;
}

const CURSOR_VERSION: &str = "v1";

/// Encode a result offset as an opaque continuation cursor.
pub(crate) fn encode_cursor(offset: u64) -> String {
    B64.encode(format!("{CURSOR_VERSION}:{offset}"))
}

/// Decode a continuation cursor previously produced by [`encode_cursor`].
pub(crate) fn decode_cursor(cursor: &str) -> Result<u64> {
    let invalid = || StoreError::InvalidQuery("unrecognized continuation cursor".into());
    let bytes = B64.decode(cursor).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (version, offset) = text.split_once(':').ok_or_else(invalid)?;
    if version != CURSOR_VERSION {
        return Err(invalid());
    }
    offset.parse().map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let c = encode_cursor(40);
        assert_eq!(decode_cursor(&c).unwrap(), 40);
    }

    #[test]
    fn mangled_cursors_are_rejected() {
        assert!(decode_cursor("not base64 at all!").is_err());
        let other_version = B64.encode("v9:40");
        assert!(decode_cursor(&other_version).is_err());
        let no_offset = B64.encode("v1:");
        assert!(decode_cursor(&no_offset).is_err());
    }

    #[test]
    fn partition_key_fields_match_collections() {
        assert_eq!(Collection::Conversations.partition_key_field(), "tenantId");
        assert_eq!(Collection::Messages.partition_key_field(), "conversationId");
    }
}
