//! Injected cache store for provider metadata.
//!
//! Entries are `{payload, timestamp}` documents. TTL is enforced when reading:
//! an expired entry is not returned by `get` but stays available through
//! `get_stale` until it is overwritten or deleted.

pub mod file;
pub mod memory;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::model::Provider;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;

/// TTL for dependency caches.
pub const DEPENDENCY_TTL_HOURS: i64 = 24;

pub fn default_ttl() -> Duration {
    Duration::hours(DEPENDENCY_TTL_HOURS)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(payload: Value, timestamp: DateTime<Utc>) -> Self {
        Self { payload, timestamp }
    }

    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.timestamp < ttl
    }
}

pub trait CacheStore: Send + Sync {
    /// The payload if present and within TTL.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// The payload if present, ignoring TTL.
    fn get_stale(&self, key: &str) -> Result<Option<Value>>;

    fn set(&self, key: &str, payload: Value) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Remove every entry. Returns how many were removed.
    fn clear(&self) -> Result<usize>;
}

impl<T: CacheStore + ?Sized> CacheStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        (**self).get(key)
    }

    fn get_stale(&self, key: &str) -> Result<Option<Value>> {
        (**self).get_stale(key)
    }

    fn set(&self, key: &str, payload: Value) -> Result<()> {
        (**self).set(key, payload)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn clear(&self) -> Result<usize> {
        (**self).clear()
    }
}

/// Tier 1 key: `"{provider}-projects"`.
pub fn metadata_key(provider: Provider) -> String {
    format!("{provider}-projects")
}

/// Tier 2 key: `"{provider}-{container}-deps"`.
pub fn dependencies_key(provider: Provider, container: &str) -> String {
    format!("{provider}-{}-deps", sanitize(container))
}

fn sanitize(container: &str) -> String {
    container
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}

pub fn get_typed<T: DeserializeOwned>(store: &dyn CacheStore, key: &str) -> Result<Option<T>> {
    store.get(key)?.map(decode).transpose()
}

pub fn get_stale_typed<T: DeserializeOwned>(
    store: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>> {
    store.get_stale(key)?.map(decode).transpose()
}

pub fn set_typed<T: Serialize>(store: &dyn CacheStore, key: &str, value: &T) -> Result<()> {
    let payload =
        serde_json::to_value(value).map_err(|e| SyncError::Cache(format!("{key}: {e}")))?;
    store.set(key, payload)
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| SyncError::Cache(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_provider_scope_convention() {
        assert_eq!(metadata_key(Provider::Jira), "jira-projects");
        assert_eq!(dependencies_key(Provider::Ado, "Platform"), "ado-Platform-deps");
        assert_eq!(
            dependencies_key(Provider::GitHub, "acme/web"),
            "github-acme_web-deps"
        );
    }

    #[test]
    fn freshness_is_relative_to_ttl() {
        let now = Utc::now();
        let entry = CacheEntry::new(Value::Null, now - Duration::hours(23));
        assert!(entry.is_fresh(default_ttl(), now));
        let entry = CacheEntry::new(Value::Null, now - Duration::hours(25));
        assert!(!entry.is_fresh(default_ttl(), now));
    }

    #[test]
    fn typed_helpers_round_trip_through_store() {
        let store = MemoryCacheStore::new();
        set_typed(&store, "k", &vec!["a".to_string()]).unwrap();
        let value: Option<Vec<String>> = get_typed(&store, "k").unwrap();
        assert_eq!(value, Some(vec!["a".to_string()]));

        let wrong: Result<Option<u32>> = get_typed(&store, "k");
        assert!(matches!(wrong, Err(SyncError::Cache(_))));
    }
}
