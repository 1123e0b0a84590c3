//! Shared-file cache with native per-entry expiration.
//!
//! Any number of processes may open the same cache file. Expired entries
//! are invisible to reads and are purged lazily: on open, and whenever a
//! read finds one.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dt_core::{BackendError, Cache, GroupId, TrackerGroup};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{DbError, configure, format_timestamp};

const BACKEND: &str = "sqlite cache";

/// Tracker groups cached in a SQLite file.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCache").finish_non_exhaustive()
    }
}

impl SqliteCache {
    /// Opens a cache at the given path, creating it if necessary.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        configure(&conn)?;
        let cache = Self::init(conn)?;
        let purged = cache.purge_expired()?;
        if purged > 0 {
            tracing::debug!(purged, path = %path.display(), "purged expired cache entries");
        }
        Ok(cache)
    }

    /// Opens an in-memory cache. Useful for testing.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch(
            "
            -- expires_at: ISO 8601, NULL for entries that never expire
            CREATE TABLE IF NOT EXISTS cache_entries (
                group_id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                expires_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deletes every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, DbError> {
        let now = format_timestamp(Utc::now());
        let purged = self.conn().execute(
            "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            [now],
        )?;
        Ok(purged)
    }

    fn fetch(&self, group_id: &GroupId, now: DateTime<Utc>) -> Result<Option<TrackerGroup>, DbError> {
        let now = format_timestamp(now);
        let conn = self.conn();
        let document: Option<String> = conn
            .query_row(
                "
                SELECT document FROM cache_entries
                WHERE group_id = ?1 AND (expires_at IS NULL OR expires_at > ?2)
                ",
                params![group_id.as_str(), now],
                |row| row.get(0),
            )
            .optional()?;
        let Some(document) = document else {
            conn.execute(
                "DELETE FROM cache_entries WHERE group_id = ?1 AND expires_at <= ?2",
                params![group_id.as_str(), now],
            )?;
            return Ok(None);
        };
        let group = serde_json::from_str(&document)
            .map_err(|source| DbError::document(group_id.as_str(), source))?;
        Ok(Some(group))
    }

    fn store(&self, group: &TrackerGroup, ttl: Option<Duration>) -> Result<(), DbError> {
        let document = serde_json::to_string(group)
            .map_err(|source| DbError::document(group.group_id().as_str(), source))?;
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .map(format_timestamp);
        self.conn().execute(
            "
            INSERT INTO cache_entries (group_id, document, expires_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (group_id) DO UPDATE SET
                document = excluded.document,
                expires_at = excluded.expires_at
            ",
            params![group.group_id().as_str(), document, expires_at],
        )?;
        Ok(())
    }

    fn remove(&self, group_id: &GroupId) -> Result<(), DbError> {
        self.conn().execute(
            "DELETE FROM cache_entries WHERE group_id = ?1",
            [group_id.as_str()],
        )?;
        Ok(())
    }

    /// Number of live entries.
    pub fn len(&self) -> Result<usize, DbError> {
        let now = format_timestamp(Utc::now());
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE expires_at IS NULL OR expires_at > ?1",
            [now],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool, DbError> {
        Ok(self.len()? == 0)
    }
}

impl Cache for SqliteCache {
    fn get(&self, group_id: &GroupId) -> Result<Option<TrackerGroup>, BackendError> {
        self.fetch(group_id, Utc::now())
            .map_err(|e| e.into_backend(BACKEND))
    }

    fn set(&self, group: &TrackerGroup, ttl: Option<Duration>) -> Result<(), BackendError> {
        self.store(group, ttl).map_err(|e| e.into_backend(BACKEND))
    }

    fn delete(&self, group_id: &GroupId) -> Result<(), BackendError> {
        self.remove(group_id).map_err(|e| e.into_backend(BACKEND))
    }

    fn exists(&self, group_id: &GroupId) -> Result<bool, BackendError> {
        Ok(self.get(group_id)?.is_some())
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.conn()
            .execute("DELETE FROM cache_entries", [])
            .map(drop)
            .map_err(|e| DbError::from(e).into_backend(BACKEND))
    }
}
