//! # Sync Metadata Repository
//!
//! Small key/value bookkeeping that must survive restarts, such as the
//! catalog watermark per store.

use sqlx::SqlitePool;

use crate::error::DbResult;
use crate::repository::parse_ts;
use tern_core::Timestamp;

/// Time of the last sync cycle that completed without a local error.
pub const LAST_SYNC_COMPLETED_AT: &str = "last_sync_completed_at";

/// Key holding the catalog watermark of a store.
pub fn catalog_sync_key(store_id: &str) -> String {
    format!("catalog_last_sync:{store_id}")
}

#[derive(Debug, Clone)]
pub struct SyncMetadataRepository {
    pool: SqlitePool,
}

impl SyncMetadataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncMetadataRepository { pool }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM sync_metadata WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value)
    }

    /// Inserts or overwrites a value.
    pub async fn set(&self, key: &str, value: &str, at: Timestamp) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reads a value stored with [`set_timestamp`](Self::set_timestamp).
    pub async fn get_timestamp(&self, key: &str) -> DbResult<Option<Timestamp>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(parse_ts("SyncMetadata", key, &raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_timestamp(&self, key: &str, value: Timestamp, at: Timestamp) -> DbResult<()> {
        self.set(key, &value.to_rfc3339(), at).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
