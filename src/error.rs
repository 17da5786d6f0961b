//! Error taxonomy shared by the store gateway, search service, and migration engine.

use thiserror::Error;

/// Typed failures surfaced by the store gateway and its callers.
///
/// The gateway never retries on its own; callers apply their own backoff
/// policy to [`StoreError::Transient`] per read/write path.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Referenced conversation or message does not exist. Reported, not retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Throttling, timeout, or transport reset. Retryable by the caller.
    #[error("transient store failure: {0}")]
    Transient(String),

    /// A legacy record cannot be mapped to the new schema. Logged per item,
    /// the run continues.
    #[error("conversion failed for {item}: {reason}")]
    Conversion { item: String, reason: String },

    /// Record already migrated. A skip, not an error.
    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// Rollback attempted without a valid confirmation token. Fails fast,
    /// no side effects.
    #[error("rollback requires the out-of-band confirmation token")]
    ConfirmationRequired,

    /// The query or cursor handed to the gateway is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Anything the gateway cannot classify. Carries the underlying transport
    /// message; callers must not assume it is retryable.
    #[error("store failure: {0}")]
    Other(String),
}

impl StoreError {
    /// Whether a caller-side retry with backoff is appropriate.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &e {
            rusqlite::Error::SqliteFailure(inner, _)
                if matches!(
                    inner.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Transient(e.to_string())
            }
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(e.to_string()),
            _ => StoreError::Other(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Other(format!("document (de)serialization failed: {e}"))
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_the_only_retryable_class() {
        assert!(StoreError::Transient("busy".into()).is_retryable());
        assert!(!StoreError::NotFound("x".into()).is_retryable());
        assert!(!StoreError::Duplicate("x".into()).is_retryable());
        assert!(!StoreError::ConfirmationRequired.is_retryable());
        assert!(!StoreError::Other("reset by peer".into()).is_retryable());
    }

    #[test]
    fn busy_sqlite_errors_map_to_transient() {
        let e = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        assert!(StoreError::from(e).is_retryable());
    }
}
