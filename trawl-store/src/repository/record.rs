//! Record store contract

use async_trait::async_trait;

use crate::error::StoreError;

/// A stored blob together with the version it was written at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    pub value: String,
    pub version: i64,
}

/// Key/blob storage with per-key compare-and-swap
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Reads the current record for `key`
    async fn get(&self, key: &str) -> Result<Option<VersionedRecord>, StoreError>;

    /// Writes `value` only if the stored version still equals `expected_version`
    ///
    /// `None` means "insert only if absent". Returns the new version on
    /// success and `None` when the precondition did not hold.
    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: Option<i64>,
        value: &str,
    ) -> Result<Option<i64>, StoreError>;

    /// Removes the record, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Lists every stored key
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}
