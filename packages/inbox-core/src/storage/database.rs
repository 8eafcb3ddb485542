//! # Database
//!
//! SQLite implementation of [`KeyValueStore`].
//!
//! ## Database Operations
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DATABASE OPERATIONS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │   Caches        │                                                   │
//! │  └────────┬────────┘                                                   │
//! │           │  StorageKey + StoreValue                                    │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │  SqliteStore    │  - One statement per call (autocommit)            │
//! │  │  (this file)    │  - Type tag kept next to the value                │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │   SQLite DB     │  - In-memory for tests                            │
//! │  │                 │  - File for production                            │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::sync::Arc;

use super::schema;
use super::{KeyValueStore, StorageKey, StoreValue};
use crate::error::{Error, Result};

/// SQLite-backed key-value store
///
/// Each write is a single autocommitted statement, so it is on disk when
/// the call returns and a reader never observes half of it.
pub struct SqliteStore {
    /// The underlying SQLite connection
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a store
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.init_schema()?;

        Ok(store)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;

                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| {
                    Error::DatabaseError(format!("Failed to set schema version: {}", e))
                })?;

                tracing::info!("Store schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::DatabaseError(format!(
                    "Store schema version {} is newer than supported {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => {
                tracing::debug!("Store schema version: {}", v);
            }
        }

        Ok(())
    }
}

fn decode_value(key: &StorageKey, kind: &str, text: String) -> Result<StoreValue> {
    match kind {
        "string" => Ok(StoreValue::String(text)),
        "number" => text.parse::<i64>().map(StoreValue::Number).map_err(|e| {
            Error::StorageCorrupted(format!("{} has a bad number {:?}: {}", key, text, e))
        }),
        "bool" => match text.as_str() {
            "1" => Ok(StoreValue::Bool(true)),
            "0" => Ok(StoreValue::Bool(false)),
            _ => Err(Error::StorageCorrupted(format!(
                "{} has a bad bool {:?}",
                key, text
            ))),
        },
        other => Err(Error::StorageCorrupted(format!(
            "{} has unknown kind {:?}",
            key, other
        ))),
    }
}

fn encode_value(value: &StoreValue) -> String {
    match value {
        StoreValue::String(s) => s.clone(),
        StoreValue::Number(n) => n.to_string(),
        StoreValue::Bool(b) => u8::from(*b).to_string(),
    }
}

impl KeyValueStore for SqliteStore {
    fn set(&self, key: &StorageKey, value: StoreValue) -> Result<()> {
        let conn = self.conn.lock();
        let now = crate::time::now_timestamp();

        conn.execute(
            "INSERT OR REPLACE INTO kv_entries (key, kind, value, updated_at) VALUES (?, ?, ?, ?)",
            params![key.encode(), value.kind(), encode_value(&value), now],
        )
        .map_err(|e| Error::StorageWriteError(format!("Failed to set {}: {}", key, e)))?;

        Ok(())
    }

    fn get(&self, key: &StorageKey) -> Result<Option<StoreValue>> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            "SELECT kind, value FROM kv_entries WHERE key = ?",
            params![key.encode()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        );

        match result {
            Ok((kind, text)) => decode_value(key, &kind, text).map(Some),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::StorageReadError(format!("Failed to get {}: {}", key, e))),
        }
    }

    fn delete(&self, key: &StorageKey) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv_entries WHERE key = ?", params![key.encode()])
            .map_err(|e| Error::StorageWriteError(format!("Failed to delete {}: {}", key, e)))?;

        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv_entries", [])
            .map_err(|e| Error::StorageWriteError(format!("Failed to clear store: {}", e)))?;

        tracing::info!("Store cleared");
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM kv_entries", [], |row| row.get(0))
            .map_err(|e| Error::StorageReadError(format!("Failed to count entries: {}", e)))?;

        Ok(count as usize)
    }
}

// ============================================================================
// TESTS
// ============================================================================
