//! Result cache persistence.

use crate::error::DatabaseError;
use crate::store::ResultCache;
use crate::types::{CacheEntry, Fingerprint};
use crate::{Error, Result};
use async_trait::async_trait;

use super::{CacheRow, Database};

impl TryFrom<CacheRow> for CacheEntry {
    type Error = Error;

    fn try_from(row: CacheRow) -> Result<Self> {
        let descriptor = serde_json::from_str(&row.descriptor).map_err(|e| {
            Error::Database(DatabaseError::Corrupt(format!(
                "cache entry {} has an unreadable descriptor: {}",
                row.fingerprint, e
            )))
        })?;
        // metadata is informational; a bad blob degrades to empty metadata
        let metadata = serde_json::from_str(&row.metadata).unwrap_or_default();

        Ok(CacheEntry {
            descriptor,
            metadata,
            caption: row.caption,
        })
    }
}

#[async_trait]
impl ResultCache for Database {
    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT fingerprint, descriptor, metadata, caption, created_at
            FROM result_cache
            WHERE fingerprint = ?
            "#,
        )
        .bind(&key.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to read cache entry: {}",
                e
            )))
        })?;

        row.map(CacheEntry::try_from).transpose()
    }

    async fn put(&self, key: &Fingerprint, entry: &CacheEntry) -> Result<()> {
        let descriptor = serde_json::to_string(&entry.descriptor)?;
        let metadata = serde_json::to_string(&entry.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO result_cache (fingerprint, descriptor, metadata, caption, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                descriptor = excluded.descriptor,
                metadata = excluded.metadata,
                caption = excluded.caption,
                created_at = excluded.created_at
            "#,
        )
        .bind(&key.0)
        .bind(descriptor)
        .bind(metadata)
        .bind(&entry.caption)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write cache entry: {}",
                e
            )))
        })?;

        Ok(())
    }

    async fn delete(&self, key: &Fingerprint) -> Result<bool> {
        let result = sqlx::query("DELETE FROM result_cache WHERE fingerprint = ?")
            .bind(&key.0)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete cache entry: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM result_cache")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count cache entries: {}",
                    e
                )))
            })?;

        Ok(count.max(0) as u64)
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM result_cache")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear cache: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }
}
