//! # Storage Module
//!
//! Durable, synchronous, string-keyed persistence shared by every cache.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ConsentCache   ContactInfoCache   ConversationIndex   DraftStore      │
//! │       │                │                   │                │          │
//! │       └────────────────┴─────────┬─────────┴────────────────┘          │
//! │                                  │  Arc<dyn KeyValueStore>             │
//! │                                  ▼                                      │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  KeyValueStore                                                  │   │
//! │  │  ─────────────                                                   │   │
//! │  │  set / get / delete / clear_all     (synchronous, never awaits) │   │
//! │  │                                                                 │   │
//! │  │  StorageKey ──encode──► "DOMAIN_<id1>[_<id2>]"                  │   │
//! │  │  StoreValue  = String | Number | Bool                           │   │
//! │  └──────────────────────────┬──────────────────────────────────────┘   │
//! │                             │                                           │
//! │              ┌──────────────┴──────────────┐                            │
//! │              ▼                             ▼                            │
//! │     ┌─────────────────┐           ┌─────────────────┐                   │
//! │     │  SqliteStore    │           │  MemoryStore    │                   │
//! │     │  (file or :mem:)│           │  (tests, tools) │                   │
//! │     └─────────────────┘           └─────────────────┘                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The store is the single source of truth. Every in-memory cache above it
//! can be dropped and rebuilt from the store plus a fresh remote fetch.
//!
//! A missing key reads back as `None`, never as an empty string or zero, so
//! "never set" and "set to a falsy value" stay distinguishable.

mod database;
mod key;
mod memory;
mod schema;

pub use database::SqliteStore;
pub use key::{Domain, StorageKey};
pub use memory::MemoryStore;

use std::sync::Arc;

use crate::error::{Error, Result};

/// A value held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreValue {
    /// UTF-8 string
    String(String),
    /// Signed integer
    Number(i64),
    /// Boolean flag
    Bool(bool),
}

impl StoreValue {
    /// Type tag persisted alongside the value
    pub fn kind(&self) -> &'static str {
        match self {
            StoreValue::String(_) => "string",
            StoreValue::Number(_) => "number",
            StoreValue::Bool(_) => "bool",
        }
    }
}

impl From<String> for StoreValue {
    fn from(value: String) -> Self {
        StoreValue::String(value)
    }
}

impl From<&str> for StoreValue {
    fn from(value: &str) -> Self {
        StoreValue::String(value.to_string())
    }
}

impl From<i64> for StoreValue {
    fn from(value: i64) -> Self {
        StoreValue::Number(value)
    }
}

impl From<bool> for StoreValue {
    fn from(value: bool) -> Self {
        StoreValue::Bool(value)
    }
}

/// Durable key-value persistence
///
/// Every call is synchronous and durable before it returns. Implementations
/// must be safe to share across tasks.
pub trait KeyValueStore: Send + Sync {
    /// Insert or overwrite a value
    fn set(&self, key: &StorageKey, value: StoreValue) -> Result<()>;

    /// Read a value, `None` when the key was never set or was deleted
    fn get(&self, key: &StorageKey) -> Result<Option<StoreValue>>;

    /// Remove a key; removing an absent key is not an error
    fn delete(&self, key: &StorageKey) -> Result<()>;

    /// Remove every key
    fn clear_all(&self) -> Result<()>;

    /// Number of stored keys
    fn len(&self) -> Result<usize>;

    /// Whether the store holds no keys
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read a string value
    fn get_string(&self, key: &StorageKey) -> Result<Option<String>> {
        match self.get(key)? {
            None => Ok(None),
            Some(StoreValue::String(s)) => Ok(Some(s)),
            Some(other) => Err(type_mismatch(key, "string", &other)),
        }
    }

    /// Read a number value
    fn get_number(&self, key: &StorageKey) -> Result<Option<i64>> {
        match self.get(key)? {
            None => Ok(None),
            Some(StoreValue::Number(n)) => Ok(Some(n)),
            Some(other) => Err(type_mismatch(key, "number", &other)),
        }
    }

    /// Read a boolean value
    fn get_bool(&self, key: &StorageKey) -> Result<Option<bool>> {
        match self.get(key)? {
            None => Ok(None),
            Some(StoreValue::Bool(b)) => Ok(Some(b)),
            Some(other) => Err(type_mismatch(key, "bool", &other)),
        }
    }
}

fn type_mismatch(key: &StorageKey, expected: &str, found: &StoreValue) -> Error {
    Error::StorageCorrupted(format!(
        "{} holds a {}, expected a {}",
        key,
        found.kind(),
        expected
    ))
}

/// Storage configuration
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Path to the database file (None for in-memory)
    pub database_path: Option<String>,
}

/// Open the store described by `config`
pub fn open(config: &StorageConfig) -> Result<Arc<dyn KeyValueStore>> {
    let store = SqliteStore::open(config.database_path.as_deref())?;
    Ok(Arc::new(store))
}
