//! SQLite record store
//!
//! Stores each record as a row of `batch_jobs`. Compare-and-swap is a
//! conditional `UPDATE` on the version column, so it also holds between
//! processes sharing the same database file.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::record::{RecordStore, VersionedRecord};
use crate::error::StoreError;

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedRecord>, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT record, version
            FROM batch_jobs
            WHERE id = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: Option<i64>,
        value: &str,
    ) -> Result<Option<i64>, StoreError> {
        let now = chrono::Utc::now();

        let result = match expected_version {
            None => {
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO batch_jobs (id, record, version, updated_at)
                    VALUES (?, ?, 1, ?)
                    "#,
                )
                .bind(key)
                .bind(value)
                .bind(now)
                .execute(&self.pool)
                .await?
            }
            Some(version) => {
                sqlx::query(
                    r#"
                    UPDATE batch_jobs
                    SET record = ?, version = version + 1, updated_at = ?
                    WHERE id = ? AND version = ?
                    "#,
                )
                .bind(value)
                .bind(now)
                .bind(key)
                .bind(version)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(expected_version.map(|v| v + 1).unwrap_or(1)))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM batch_jobs WHERE id = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let keys: Vec<(String,)> = sqlx::query_as("SELECT id FROM batch_jobs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(keys.into_iter().map(|(key,)| key).collect())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RecordRow {
    record: String,
    version: i64,
}

impl From<RecordRow> for VersionedRecord {
    fn from(row: RecordRow) -> Self {
        VersionedRecord {
            value: row.record,
            version: row.version,
        }
    }
}
