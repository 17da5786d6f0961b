//! Embedded document-store backend: schema, pragmas, and query execution.
//!
//! Each collection is one table of JSON documents keyed by id with an
//! explicit partition-key column. Queries arrive as `@name`-parameterized SQL
//! produced by the query builder; pagination is folded into the opaque
//! continuation cursor so callers never see offsets.

use parking_lot::Mutex;
use rusqlite::Connection;
use serde_json::Value;
use std::fs;
use tracing::{debug, info};

use crate::config::HistoryConfig;
use crate::error::{Result, StoreError};
use crate::store::{
    Collection, DocumentStore, HealthStatus, ParamValue, QueryPage, StoreQuery, decode_cursor,
    encode_cursor,
};

const SCHEMA_VERSION: i64 = 1;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    cfg: HistoryConfig,
}

impl rusqlite::ToSql for ParamValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        match self {
            ParamValue::Text(s) => s.to_sql(),
            ParamValue::Int(i) => i.to_sql(),
            ParamValue::Real(f) => f.to_sql(),
        }
    }
}

impl SqliteStore {
    /// Open (creating if absent) the backing database and record store
    /// metadata. Collection creation is separate; see
    /// [`DocumentStore::ensure_collections`].
    pub fn open(cfg: HistoryConfig) -> Result<Self> {
        cfg.validate()
            .map_err(|e| StoreError::InvalidQuery(e.to_string()))?;
        if let Some(parent) = cfg.db_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::Other(format!("creating store directory: {e}")))?;
        }
        let conn = Connection::open(&cfg.db_path)?;
        apply_pragmas(&conn)?;
        init_meta(&conn, &cfg.database_name)?;
        info!(path = %cfg.db_path.display(), database = %cfg.database_name, "opened document store");
        Ok(Self {
            conn: Mutex::new(conn),
            cfg,
        })
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.cfg
    }

    /// Backing table for a logical collection.
    fn table(&self, collection: Collection) -> &str {
        match collection {
            Collection::Conversations => &self.cfg.conversations_collection,
            Collection::Messages => &self.cfg.messages_collection,
        }
    }

    /// Drop documents whose per-item TTL has elapsed. Lazy: runs ahead of
    /// reads instead of on a background sweep.
    fn purge_expired(&self, conn: &Connection, table: &str) -> Result<()> {
        let purged = conn.execute(
            &format!(
                "DELETE FROM {table} WHERE expires_at IS NOT NULL AND expires_at <= strftime('%s','now')"
            ),
            [],
        )?;
        if purged > 0 {
            debug!(collection = table, purged, "purged expired documents");
        }
        Ok(())
    }
}

impl DocumentStore for SqliteStore {
    async fn ensure_collections(&self) -> Result<()> {
        let conn = self.conn.lock();
        for collection in [Collection::Conversations, Collection::Messages] {
            let table = self.table(collection);
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    pk TEXT NOT NULL,
                    doc TEXT NOT NULL,
                    expires_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_pk ON {table}(pk);"
            ))?;
        }
        // Index the fields the builder sorts and filters on.
        let conversations = self.table(Collection::Conversations);
        let messages = self.table(Collection::Messages);
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{conversations}_last_activity
                 ON {conversations}(pk, json_extract(doc, '$.timeline.lastMessageAt') DESC);
             CREATE INDEX IF NOT EXISTS idx_{messages}_sequence
                 ON {messages}(pk, json_extract(doc, '$.sequenceNumber'));
             CREATE INDEX IF NOT EXISTS idx_{messages}_timestamp
                 ON {messages}(json_extract(doc, '$.timestamp'));"
        ))?;
        debug!(
            conversations = conversations,
            messages = messages,
            "collections ready"
        );
        Ok(())
    }

    async fn execute(
        &self,
        collection: Collection,
        query: &StoreQuery,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<QueryPage> {
        if page_size == 0 {
            return Err(StoreError::InvalidQuery("page size must be non-zero".into()));
        }
        let offset = match cursor {
            Some(c) if !c.is_empty() => decode_cursor(c)?,
            _ => 0,
        };

        let conn = self.conn.lock();
        self.purge_expired(&conn, self.table(collection))?;

        debug!(
            collection = collection.name(),
            cross_partition = !query.partition_pinned,
            offset,
            page_size,
            "executing store query"
        );

        // Fetch one row past the page to learn whether more exist.
        let fetch = page_size + 1;
        let sql = format!("{} LIMIT {fetch} OFFSET {offset}", query.sql);
        let mut stmt = conn.prepare(&sql)?;
        for (name, value) in &query.params {
            let idx = stmt.parameter_index(name)?.ok_or_else(|| {
                StoreError::InvalidQuery(format!("parameter {name} not referenced by query"))
            })?;
            stmt.raw_bind_parameter(idx, value)?;
        }

        let mut rows = stmt.raw_query();
        let mut items: Vec<Value> = Vec::new();
        while let Some(row) = rows.next()? {
            let doc: String = row.get(0)?;
            items.push(serde_json::from_str(&doc)?);
        }

        let has_more = items.len() > page_size;
        items.truncate(page_size);
        let next_cursor = has_more.then(|| encode_cursor(offset + page_size as u64));

        Ok(QueryPage { items, next_cursor })
    }

    async fn upsert(&self, collection: Collection, doc: &Value) -> Result<()> {
        let id = doc
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::InvalidQuery("document missing id".into()))?;
        let pk_field = collection.partition_key_field();
        let pk = doc
            .get(pk_field)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StoreError::InvalidQuery(format!("document missing partition key {pk_field}"))
            })?;
        let expires_at = doc
            .get("ttl")
            .and_then(Value::as_i64)
            .map(|ttl| chrono::Utc::now().timestamp() + ttl);

        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO {} (id, pk, doc, expires_at) VALUES (@id, @pk, @doc, @expiresAt)
                 ON CONFLICT(id) DO UPDATE SET
                     pk = excluded.pk, doc = excluded.doc, expires_at = excluded.expires_at",
                self.table(collection)
            ),
            rusqlite::named_params! {
                "@id": id,
                "@pk": pk,
                "@doc": doc.to_string(),
                "@expiresAt": expires_at,
            },
        )?;
        Ok(())
    }

    async fn read(
        &self,
        collection: Collection,
        id: &str,
        partition_key: &str,
    ) -> Result<Option<Value>> {
        use rusqlite::OptionalExtension;

        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row(
                &format!(
                    "SELECT doc FROM {} WHERE id = @id AND pk = @pk
                     AND (expires_at IS NULL OR expires_at > strftime('%s','now'))",
                    self.table(collection)
                ),
                rusqlite::named_params! { "@id": id, "@pk": partition_key },
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    async fn delete(&self, collection: Collection, id: &str, partition_key: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!(
                "DELETE FROM {} WHERE id = @id AND pk = @pk",
                self.table(collection)
            ),
            rusqlite::named_params! { "@id": id, "@pk": partition_key },
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "{}/{id}",
                collection.name()
            )));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let conn = self.conn.lock();
        let mut collections = Vec::new();
        let mut healthy = true;
        for collection in [Collection::Conversations, Collection::Messages] {
            let table = self.table(collection);
            let status = match conn.query_row(
                &format!("SELECT COUNT(*) FROM {table}"),
                [],
                |row| row.get::<_, i64>(0),
            ) {
                Ok(count) => format!("healthy ({count} documents)"),
                Err(e) => {
                    healthy = false;
                    format!("error: {e}")
                }
            };
            collections.push((table.to_string(), status));
        }
        Ok(HealthStatus {
            healthy,
            database: self.cfg.database_name.clone(),
            collections,
        })
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;
    Ok(())
}

fn init_meta(conn: &Connection, database_name: &str) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', @version)",
        rusqlite::named_params! { "@version": SCHEMA_VERSION.to_string() },
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('database_name', @name)",
        rusqlite::named_params! { "@name": database_name },
    )?;
    Ok(())
}
