//! Durable full-state snapshots.
//!
//! Every owning component writes its complete state as one named blob and
//! reads it back on start. There is no patching: `save` replaces whatever was
//! stored under the same name.

use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::error::StoreError;

/// Blob holding the scheduler's job set.
pub const SCHEDULED_JOBS_KEY: &str = "scheduled_jobs";
/// Blob holding the bounded security event log.
pub const SECURITY_EVENTS_KEY: &str = "security_events";

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Load/save port for one component's state.
pub trait SnapshotStore<T>: Send + Sync {
    /// Returns `None` when nothing has been saved yet.
    fn load(&self) -> StoreResult<Option<T>>;

    fn save(&self, state: &T) -> StoreResult<()>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Keeps the last saved snapshot in memory only. Lost on restart.
pub struct MemoryStore<T> {
    slot: Mutex<Option<T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn with_state(state: T) -> Self {
        Self {
            slot: Mutex::new(Some(state)),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> SnapshotStore<T> for MemoryStore<T> {
    fn load(&self) -> StoreResult<Option<T>> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, state: &T) -> StoreResult<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// One pretty-printed JSON document per blob.
///
/// Writes go to `<path>.tmp` first and are renamed over the target so a crash
/// mid-write leaves the previous snapshot intact.
pub struct JsonFileStore<T> {
    path: PathBuf,
    _state: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _state: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T: Serialize + DeserializeOwned> SnapshotStore<T> for JsonFileStore<T> {
    fn load(&self) -> StoreResult<Option<T>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, state: &T) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "snapshot written");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// Create the `snapshots` table in `conn` (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS snapshots (
            key         TEXT    NOT NULL PRIMARY KEY,
            value       TEXT    NOT NULL,   -- JSON document
            updated_at  TEXT    NOT NULL    -- ISO-8601
        ) STRICT;
        ",
    )
}

/// Stores one named blob as a row of the `snapshots` table.
///
/// Each store owns its own `Connection`; several stores may point at the same
/// database file with different keys.
pub struct SqliteStore<T> {
    conn: Mutex<Connection>,
    key: String,
    _state: PhantomData<fn() -> T>,
}

impl<T> SqliteStore<T> {
    pub fn new(conn: Connection, key: impl Into<String>) -> StoreResult<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            key: key.into(),
            _state: PhantomData,
        })
    }

    /// Open (or create) the database file at `path` and bind to `key`.
    pub fn open(path: impl AsRef<Path>, key: impl Into<String>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn, key)
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<T: Serialize + DeserializeOwned> SnapshotStore<T> for SqliteStore<T> {
    fn load(&self) -> StoreResult<Option<T>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM snapshots WHERE key = ?1",
                [&self.key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn save(&self, state: &T) -> StoreResult<()> {
        let value = serde_json::to_string(state)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO snapshots (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                            updated_at = excluded.updated_at",
            rusqlite::params![self.key, value, now],
        )?;
        debug!(key = %self.key, "snapshot saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_starts_empty_and_replaces() {
        let store: MemoryStore<Vec<u32>> = MemoryStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&vec![1, 2]).unwrap();
        store.save(&vec![3]).unwrap();
        assert_eq!(store.load().unwrap(), Some(vec![3]));
    }

    #[test]
    fn json_file_store_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Vec<String>> = JsonFileStore::new(dir.path().join("jobs.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn json_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.json");
        let writer: JsonFileStore<Vec<String>> = JsonFileStore::new(&path);
        writer
            .save(&vec!["a".to_string(), "b".to_string()])
            .unwrap();

        let reopened: JsonFileStore<Vec<String>> = JsonFileStore::new(&path);
        assert_eq!(
            reopened.load().unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn json_file_store_rejects_corrupt_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        fs::write(&path, "{not json").unwrap();
        let store: JsonFileStore<Vec<u32>> = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Encoding(_))));
    }

    #[test]
    fn sqlite_store_keys_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("applytrack.db");
        let jobs: SqliteStore<Vec<u32>> = SqliteStore::open(&db, SCHEDULED_JOBS_KEY).unwrap();
        let events: SqliteStore<Vec<u32>> = SqliteStore::open(&db, SECURITY_EVENTS_KEY).unwrap();

        jobs.save(&vec![1, 2, 3]).unwrap();
        assert!(events.load().unwrap().is_none());

        events.save(&vec![9]).unwrap();
        jobs.save(&vec![4]).unwrap();

        assert_eq!(jobs.load().unwrap(), Some(vec![4]));
        assert_eq!(events.load().unwrap(), Some(vec![9]));
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("applytrack.db");
        {
            let store: SqliteStore<String> = SqliteStore::open(&db, "blob").unwrap();
            store.save(&"hello".to_string()).unwrap();
        }
        let store: SqliteStore<String> = SqliteStore::open(&db, "blob").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("hello"));
    }
}
