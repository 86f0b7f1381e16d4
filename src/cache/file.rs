use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use serde_json::Value;

use super::{default_ttl, CacheEntry, CacheStore};
use crate::error::{Result, SyncError};

/// One JSON document per key under a cache directory.
///
/// Writes go through a temp file and a rename. Unreadable documents are
/// deleted and treated as a miss.
pub struct FileCacheStore {
    dir: PathBuf,
    ttl: Duration,
}

impl FileCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_ttl(dir, default_ttl())
    }

    pub fn with_ttl(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        if !path.exists() {
            tracing::debug!("Cache miss: {}", key);
            return Ok(None);
        }

        let contents = fs::read_to_string(&path).map_err(|e| cache_err(&path, e))?;
        match serde_json::from_str::<CacheEntry>(&contents) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!("Corrupt cache entry {}, deleting: {}", key, e);
                self.delete(key)?;
                Ok(None)
            }
        }
    }
}

fn cache_err(path: &Path, e: std::io::Error) -> SyncError {
    SyncError::Cache(format!("{}: {e}", path.display()))
}

impl CacheStore for FileCacheStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let Some(entry) = self.read_entry(key)? else {
            return Ok(None);
        };
        if entry.is_fresh(self.ttl, Utc::now()) {
            tracing::debug!("Cache hit: {}", key);
            Ok(Some(entry.payload))
        } else {
            tracing::debug!("Cache expired: {} (written {})", key, entry.timestamp);
            Ok(None)
        }
    }

    fn get_stale(&self, key: &str) -> Result<Option<Value>> {
        let entry = self.read_entry(key)?;
        if let Some(entry) = &entry {
            tracing::warn!("Using stale cache: {} (written {})", key, entry.timestamp);
        }
        Ok(entry.map(|e| e.payload))
    }

    fn set(&self, key: &str, payload: Value) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| cache_err(&self.dir, e))?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&CacheEntry::new(payload, Utc::now()))?;

        if let Err(e) = fs::write(&tmp, json).and_then(|_| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(cache_err(&path, e));
        }
        tracing::debug!("Cache set: {}", key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| cache_err(&path, e))?;
            tracing::debug!("Cache deleted: {}", key);
        }
        Ok(())
    }

    fn clear(&self) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).map_err(|e| cache_err(&self.dir, e))? {
            let path = entry.map_err(|e| cache_err(&self.dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path).map_err(|e| cache_err(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_payload_and_timestamp_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("cache"));
        store.set("jira-projects", json!({"projects": ["ENG"]})).unwrap();

        let raw = fs::read_to_string(dir.path().join("cache/jira-projects.json")).unwrap();
        let doc: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["payload"], json!({"projects": ["ENG"]}));
        assert!(doc["timestamp"].is_string());

        assert_eq!(
            store.get("jira-projects").unwrap(),
            Some(json!({"projects": ["ENG"]}))
        );
    }

    #[test]
    fn ttl_is_enforced_at_read_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        let old = CacheEntry::new(json!([1, 2]), Utc::now() - Duration::hours(48));
        fs::write(
            dir.path().join("ado-Platform-deps.json"),
            serde_json::to_string(&old).unwrap(),
        )
        .unwrap();

        assert_eq!(store.get("ado-Platform-deps").unwrap(), None);
        // Expired files are kept for stale fallback.
        assert_eq!(store.get_stale("ado-Platform-deps").unwrap(), Some(json!([1, 2])));
        assert!(dir.path().join("ado-Platform-deps.json").exists());
    }

    #[test]
    fn corrupt_documents_are_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        let path = dir.path().join("github-projects.json");
        fs::write(&path, "{not json").unwrap();

        assert_eq!(store.get("github-projects").unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        store.set("a", json!(1)).unwrap();
        store.set("b", json!(2)).unwrap();

        store.delete("a").unwrap();
        store.delete("missing").unwrap();
        assert_eq!(store.get_stale("a").unwrap(), None);
        assert_eq!(store.clear().unwrap(), 1);
        assert_eq!(store.clear().unwrap(), 0);
    }
}
