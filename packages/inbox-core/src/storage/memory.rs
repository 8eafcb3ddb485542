//! In-memory store.
//!
//! Same contract as [`SqliteStore`](super::SqliteStore) without durability
//! across process restarts. Useful for tests and throwaway sessions.

use parking_lot::RwLock;
use std::collections::HashMap;

use super::{KeyValueStore, StorageKey, StoreValue};
use crate::error::Result;

/// A `HashMap`-backed key-value store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoreValue>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn set(&self, key: &StorageKey, value: StoreValue) -> Result<()> {
        self.entries.write().insert(key.encode(), value);
        Ok(())
    }

    fn get(&self, key: &StorageKey) -> Result<Option<StoreValue>> {
        Ok(self.entries.read().get(&key.encode()).cloned())
    }

    fn delete(&self, key: &StorageKey) -> Result<()> {
        self.entries.write().remove(&key.encode());
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, Topic};

    #[test]
    fn test_set_get_delete() {
        let store = MemoryStore::new();
        let key = StorageKey::draft_text(&Address::parse("0xa1").unwrap(), &Topic::new("t"));

        assert_eq!(store.get(&key).unwrap(), None);
        store.set(&key, "hello".into()).unwrap();
        assert_eq!(store.get_string(&key).unwrap().as_deref(), Some("hello"));

        store.delete(&key).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);
        // Deleting again is fine
        store.delete(&key).unwrap();
    }

    #[test]
    fn test_falsy_values_are_not_absent() {
        let store = MemoryStore::new();
        let key = StorageKey::ens_name(&Address::parse("0xa1").unwrap());

        store.set(&key, "".into()).unwrap();
        assert_eq!(store.get_string(&key).unwrap(), Some(String::new()));

        store.set(&key, false.into()).unwrap();
        assert_eq!(store.get_bool(&key).unwrap(), Some(false));
    }

    #[test]
    fn test_clear_all_twice() {
        let store = MemoryStore::new();
        let key = StorageKey::ens_name(&Address::parse("0xa1").unwrap());
        store.set(&key, "vitalik.eth".into()).unwrap();

        store.clear_all().unwrap();
        assert!(store.is_empty().unwrap());
        store.clear_all().unwrap();
        assert!(store.is_empty().unwrap());
    }
}
