//! SQLite backends for the tracking engine.
//!
//! Provides a durable [`SqliteStore`] and a shared-file [`SqliteCache`]
//! with per-entry expiration, both using `rusqlite`.
//!
//! # Thread Safety
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so each backend keeps its
//! connection behind a `Mutex` and serializes calls. Several processes may
//! open the same file; SQLite's own locking applies and a busy database is
//! reported as a timeout after [`BUSY_TIMEOUT`].
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in ISO 8601 format with millisecond
//! precision (e.g., `2024-01-15T10:30:00.000Z`). With a fixed format,
//! lexicographic ordering matches chronological ordering, which the cache
//! relies on to compare expirations in SQL.
//!
//! ## Documents
//!
//! Trackers and cached groups are stored as JSON documents produced by
//! their `serde` implementations. Unknown fields are ignored on read, so
//! adding fields is backwards compatible; renaming or removing them is not.

mod cache;
mod store;

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use dt_core::BackendError;
use rusqlite::{Connection, ErrorCode};
use thiserror::Error;

pub use cache::SqliteCache;
pub use store::SqliteStore;

/// How long a call waits on a locked database before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored document could not be encoded or decoded.
    #[error("invalid document for {key}")]
    Document {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DbError {
    fn document(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Document {
            key: key.into(),
            source,
        }
    }

    /// Whether the database was locked by another connection.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }

    /// Classifies the error for the engine.
    pub fn into_backend(self, backend: &'static str) -> BackendError {
        if self.is_busy() {
            return BackendError::timeout(backend, self);
        }
        match self {
            Self::Document { .. } => BackendError::serialization(backend, self),
            Self::Sqlite(_) => BackendError::unavailable(backend, self),
        }
    }
}

fn configure(conn: &Connection) -> Result<(), DbError> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_errors_map_to_timeout() {
        let busy = DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_busy());
        let err = busy.into_backend("sqlite store");
        assert_eq!(err.kind(), dt_core::BackendErrorKind::Timeout);
    }

    #[test]
    fn document_errors_map_to_serialization() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = DbError::document("g/t", source).into_backend("sqlite store");
        assert_eq!(err.kind(), dt_core::BackendErrorKind::Serialization);
        assert_eq!(
            err.to_string(),
            "sqlite store backend serialization failed: invalid document for g/t"
        );
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let early = DateTime::parse_from_rfc3339("2025-01-01T09:59:59.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2025-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(late), "2025-01-01T10:00:00.000Z");
        assert!(format_timestamp(early) < format_timestamp(late));
    }
}
