//! Durable document store.
//!
//! A group is the set of rows sharing a `group_id`; each row holds one
//! tracker's full state as a JSON sub-document, ordered by `position`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dt_core::{BackendError, GroupId, Store, Tracker, TrackerGroup, TrackerName};
use rusqlite::{Connection, params};

use crate::{DbError, configure, format_timestamp};

const BACKEND: &str = "sqlite store";

/// Tracker groups persisted in a SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens a store at the given path, creating it if necessary.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        configure(&conn)?;
        Self::init(conn)
    }

    /// Opens an in-memory store. Useful for testing.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Initializes the schema. Idempotent.
    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch(
            "
            -- One row per tracker. document: the tracker's JSON state.
            -- position: insertion order within the group.
            CREATE TABLE IF NOT EXISTS trackers (
                group_id TEXT NOT NULL,
                name TEXT NOT NULL,
                position INTEGER NOT NULL,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (group_id, name)
            );

            CREATE INDEX IF NOT EXISTS idx_trackers_position ON trackers(group_id, position);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lists the IDs of every stored group, sorted.
    pub fn group_ids(&self) -> Result<Vec<GroupId>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT group_id FROM trackers ORDER BY group_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            let raw = row?;
            match GroupId::new(raw.as_str()) {
                Ok(id) => ids.push(id),
                Err(err) => tracing::warn!(group_id = %raw, error = %err, "skipping invalid group row"),
            }
        }
        Ok(ids)
    }

    fn load_group(&self, group_id: &GroupId) -> Result<Option<TrackerGroup>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "
            SELECT name, document FROM trackers
            WHERE group_id = ?1
            ORDER BY position ASC, name ASC
            ",
        )?;
        let rows = stmt.query_map([group_id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut group = TrackerGroup::new(group_id.clone());
        for row in rows {
            let (name, document) = row?;
            let tracker: Tracker = serde_json::from_str(&document)
                .map_err(|source| DbError::document(format!("{group_id}/{name}"), source))?;
            group.upsert(tracker);
        }
        Ok((!group.is_empty()).then_some(group))
    }

    fn replace_group(&self, group: &TrackerGroup) -> Result<(), DbError> {
        let documents = encode(group.group_id(), group.trackers().iter())?;
        let updated_at = format_timestamp(Utc::now());
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM trackers WHERE group_id = ?1",
            [group.group_id().as_str()],
        )?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO trackers (group_id, name, position, document, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
            )?;
            for (position, (name, document)) in documents.iter().enumerate() {
                let position = i64::try_from(position).unwrap_or(i64::MAX);
                stmt.execute(params![
                    group.group_id().as_str(),
                    name,
                    position,
                    document,
                    updated_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_trackers(&self, group_id: &GroupId, trackers: &[&Tracker]) -> Result<(), DbError> {
        if trackers.is_empty() {
            return Ok(());
        }
        let documents = encode(group_id, trackers.iter().copied())?;
        let updated_at = format_timestamp(Utc::now());
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO trackers (group_id, name, position, document, updated_at)
                VALUES (
                    ?1, ?2,
                    COALESCE((SELECT MAX(position) + 1 FROM trackers WHERE group_id = ?1), 0),
                    ?3, ?4
                )
                ON CONFLICT (group_id, name) DO UPDATE SET
                    document = excluded.document,
                    updated_at = excluded.updated_at
                ",
            )?;
            for (name, document) in &documents {
                stmt.execute(params![group_id.as_str(), name, document, updated_at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_rows(&self, group_id: &GroupId, name: Option<&TrackerName>) -> Result<(), DbError> {
        let conn = self.conn();
        match name {
            Some(name) => conn.execute(
                "DELETE FROM trackers WHERE group_id = ?1 AND name = ?2",
                params![group_id.as_str(), name.as_str()],
            )?,
            None => conn.execute(
                "DELETE FROM trackers WHERE group_id = ?1",
                [group_id.as_str()],
            )?,
        };
        Ok(())
    }

    #[cfg(test)]
    fn position(&self, group_id: &GroupId, name: &TrackerName) -> Result<Option<i64>, DbError> {
        use rusqlite::OptionalExtension;

        let conn = self.conn();
        let position = conn
            .query_row(
                "SELECT position FROM trackers WHERE group_id = ?1 AND name = ?2",
                params![group_id.as_str(), name.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(position)
    }
}

fn encode<'a>(
    group_id: &GroupId,
    trackers: impl Iterator<Item = &'a Tracker>,
) -> Result<Vec<(String, String)>, DbError> {
    trackers
        .map(|tracker| {
            let name = tracker.name().to_string();
            serde_json::to_string(tracker)
                .map(|document| (name.clone(), document))
                .map_err(|source| DbError::document(format!("{group_id}/{name}"), source))
        })
        .collect()
}

impl Store for SqliteStore {
    fn load(&self, group_id: &GroupId) -> Result<Option<TrackerGroup>, BackendError> {
        self.load_group(group_id).map_err(|e| e.into_backend(BACKEND))
    }

    fn save(&self, group: &TrackerGroup) -> Result<(), BackendError> {
        self.replace_group(group).map_err(|e| e.into_backend(BACKEND))
    }

    fn save_trackers(&self, group_id: &GroupId, trackers: &[&Tracker]) -> Result<(), BackendError> {
        self.upsert_trackers(group_id, trackers)
            .map_err(|e| e.into_backend(BACKEND))
    }

    fn delete(&self, group_id: &GroupId, name: Option<&TrackerName>) -> Result<(), BackendError> {
        self.delete_rows(group_id, name)
            .map_err(|e| e.into_backend(BACKEND))
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.conn()
            .execute("DELETE FROM trackers", [])
            .map(drop)
            .map_err(|e| DbError::from(e).into_backend(BACKEND))
    }
}
