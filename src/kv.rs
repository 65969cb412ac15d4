//! Key-value stores backing the metrics cache.
//!
//! The cache policy layer only ever sees the `KvStore` trait; production runs
//! use the SQLite store under `~/.shipdeck/`, tests and ephemeral runs use
//! the in-memory store.

use std::path::Path;
use std::sync::Mutex;

use dashmap::DashMap;
use rusqlite::{Connection, OptionalExtension};

use crate::error::StoreError;

/// Minimal persistence contract for cached metrics. Values are opaque strings
/// (JSON at the call sites); entries survive process restarts when the
/// backing store does.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store for tests and cache-less runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// SQLite-backed store, one upsert table. A single connection behind a mutex
/// is plenty: the write rate is a handful of small rows per day.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at `~/.shipdeck/shipdeck.db`.
    pub fn open() -> Result<Self, StoreError> {
        let dir = dirs::home_dir()
            .ok_or_else(|| {
                StoreError::Unavailable("Could not determine home directory".to_string())
            })?
            .join(".shipdeck");
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::Io(format!("Failed to create {}: {}", dir.display(), e)))?;
        Self::open_at(dir.join("shipdeck.db"))
    }

    /// Open (or create) the store at an explicit path.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StoreError::Io(format!("Failed to open cache db: {}", e)))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StoreError::Io(format!("Failed to enable WAL: {}", e)))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .map_err(|e| StoreError::Io(format!("Failed to ensure kv_cache schema: {}", e)))?;
        Ok(SqliteStore { conn: Mutex::new(conn) })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("Cache db lock poisoned".to_string()))?;
        f(&conn).map_err(|e| StoreError::Io(e.to_string()))
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv_cache WHERE key = ?1", [key], |row| row.get(0))
                .optional()
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv_cache (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                rusqlite::params![key, value, chrono::Utc::now().to_rfc3339()],
            )
            .map(|_| ())
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv_cache WHERE key = ?1", [key]).map(|_| ())
        })
    }
}
