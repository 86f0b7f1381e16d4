use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::model::LocalRecord;

/// Persistence for local records, keyed by `LocalRecord::key`.
pub trait RecordStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<LocalRecord>>;
    fn upsert(&self, record: LocalRecord) -> Result<()>;
    fn all(&self) -> Result<Vec<LocalRecord>>;

    /// Persist buffered upserts. Called once at the end of a reconcile.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    records: BTreeMap<String, LocalRecord>,
}

/// All records in one JSON document. Upserts stay in memory until `flush`;
/// dropping the store flushes anything still pending.
pub struct JsonRecordStore {
    path: PathBuf,
    data: Mutex<StoreData>,
    dirty: AtomicBool,
}

impl JsonRecordStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| SyncError::Cache(format!("{}: {e}", path.display())))?;
            serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("Unreadable record store {}, starting empty: {}", path.display(), e);
                StoreData::default()
            })
        } else {
            StoreData::default()
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, StoreData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save(&self, data: &StoreData) -> Result<()> {
        let io_err = |e: std::io::Error| SyncError::Cache(format!("{}: {e}", self.path.display()));
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(io_err)
    }
}

impl RecordStore for JsonRecordStore {
    fn get(&self, key: &str) -> Result<Option<LocalRecord>> {
        Ok(self.lock().records.get(key).cloned())
    }

    fn upsert(&self, record: LocalRecord) -> Result<()> {
        let mut data = self.lock();
        data.records.insert(record.key(), record);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn all(&self) -> Result<Vec<LocalRecord>> {
        Ok(self.lock().records.values().cloned().collect())
    }

    fn flush(&self) -> Result<()> {
        let data = self.lock();
        if !self.dirty.load(Ordering::Acquire) {
            return Ok(());
        }
        self.save(&data)?;
        self.dirty.store(false, Ordering::Release);
        tracing::debug!("Saved {} records to {}", data.records.len(), self.path.display());
        Ok(())
    }
}

impl Drop for JsonRecordStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!("Unsaved records lost: {}", e);
        }
    }
}

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<String, LocalRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, LocalRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, key: &str) -> Result<Option<LocalRecord>> {
        Ok(self.lock().get(key).cloned())
    }

    fn upsert(&self, record: LocalRecord) -> Result<()> {
        self.lock().insert(record.key(), record);
        Ok(())
    }

    fn all(&self) -> Result<Vec<LocalRecord>> {
        Ok(self.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::Provider;
    use crate::providers::tests::work_item;

    #[test]
    fn json_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/records.json");

        let store = JsonRecordStore::open(&path).unwrap();
        let record = LocalRecord::imported(&work_item(Provider::Jira, "ENG", "ENG-1", "One"), Utc::now());
        store.upsert(record.clone()).unwrap();
        store.flush().unwrap();
        assert!(path.exists());

        let reopened = JsonRecordStore::open(&path).unwrap();
        assert_eq!(reopened.get("jira:ENG-1").unwrap(), Some(record));
        assert_eq!(reopened.all().unwrap().len(), 1);
    }

    #[test]
    fn upserts_are_written_on_flush_or_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");

        let store = JsonRecordStore::open(&path).unwrap();
        for n in 1..=3 {
            let id = format!("ENG-{n}");
            store
                .upsert(LocalRecord::imported(&work_item(Provider::Jira, "ENG", &id, "Item"), Utc::now()))
                .unwrap();
        }
        assert!(!path.exists());
        drop(store);

        let reopened = JsonRecordStore::open(&path).unwrap();
        assert_eq!(reopened.all().unwrap().len(), 3);
    }

    #[test]
    fn failed_flush_keeps_records_pending() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        std::fs::write(&blocker, "not a directory").unwrap();

        let store = JsonRecordStore::open(blocker.join("records.json")).unwrap();
        let record = LocalRecord::imported(&work_item(Provider::Jira, "ENG", "ENG-1", "One"), Utc::now());
        store.upsert(record.clone()).unwrap();

        assert!(store.flush().is_err());
        assert_eq!(store.get("jira:ENG-1").unwrap(), Some(record));
        assert!(store.dirty.load(Ordering::Acquire));
        // Nothing can be written; drop only logs.
        drop(store);
    }

    #[test]
    fn corrupt_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, "[not a store").unwrap();

        let store = JsonRecordStore::open(&path).unwrap();
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn memory_store_replaces_by_key() {
        let store = MemoryRecordStore::new();
        let mut record =
            LocalRecord::imported(&work_item(Provider::GitHub, "acme/api", "acme/api#1", "One"), Utc::now());
        store.upsert(record.clone()).unwrap();
        record.fields.title = "Renamed".into();
        store.upsert(record).unwrap();

        let all = store.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].fields.title, "Renamed");
    }
}
