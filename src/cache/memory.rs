use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use serde_json::Value;

use super::{default_ttl, CacheEntry, CacheStore};
use crate::error::Result;

/// In-process cache store. Used for tests and one-shot runs.
pub struct MemoryCacheStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::with_ttl(default_ttl())
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert an entry with an explicit timestamp.
    pub fn insert_entry(&self, key: &str, entry: CacheEntry) {
        self.lock().insert(key.to_string(), entry);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Utc::now();
        Ok(self
            .lock()
            .get(key)
            .filter(|entry| entry.is_fresh(self.ttl, now))
            .map(|entry| entry.payload.clone()))
    }

    fn get_stale(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock().get(key).map(|entry| entry.payload.clone()))
    }

    fn set(&self, key: &str, payload: Value) -> Result<()> {
        self.lock()
            .insert(key.to_string(), CacheEntry::new(payload, Utc::now()));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<usize> {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expired_entries_are_only_served_stale() {
        let store = MemoryCacheStore::new();
        store.insert_entry(
            "ado-projects",
            CacheEntry::new(json!({"n": 1}), Utc::now() - Duration::hours(30)),
        );

        assert_eq!(store.get("ado-projects").unwrap(), None);
        assert_eq!(store.get_stale("ado-projects").unwrap(), Some(json!({"n": 1})));
        assert!(store.contains("ado-projects"));
    }

    #[test]
    fn set_delete_clear() {
        let store = MemoryCacheStore::new();
        store.set("a", json!(1)).unwrap();
        store.set("b", json!(2)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!(1)));

        store.delete("a").unwrap();
        assert_eq!(store.get_stale("a").unwrap(), None);
        assert_eq!(store.clear().unwrap(), 1);
    }
}
