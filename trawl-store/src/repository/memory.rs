//! In-memory record store
//!
//! Process-local and lost on exit. Used by tests and by callers that want a
//! throwaway job store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::record::{RecordStore, VersionedRecord};
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<String, VersionedRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, VersionedRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|e| StoreError::Backend(format!("record map poisoned: {}", e)))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedRecord>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: Option<i64>,
        value: &str,
    ) -> Result<Option<i64>, StoreError> {
        let mut records = self.lock()?;
        let current = records.get(key).map(|record| record.version);

        if current != expected_version {
            return Ok(None);
        }

        let version = current.map(|v| v + 1).unwrap_or(1);
        records.insert(
            key.to_string(),
            VersionedRecord {
                value: value.to_string(),
                version,
            },
        );

        Ok(Some(version))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compare_and_set_semantics() {
        let store = MemoryRecordStore::new();

        assert_eq!(store.compare_and_set("k", Some(1), "x").await.unwrap(), None);
        assert_eq!(store.compare_and_set("k", None, "x").await.unwrap(), Some(1));
        assert_eq!(store.compare_and_set("k", None, "y").await.unwrap(), None);
        assert_eq!(store.compare_and_set("k", Some(1), "y").await.unwrap(), Some(2));

        let record = store.get("k").await.unwrap().unwrap();
        assert_eq!(record, VersionedRecord { value: "y".to_string(), version: 2 });

        assert!(store.delete("k").await.unwrap());
        assert!(store.keys().await.unwrap().is_empty());
    }
}
