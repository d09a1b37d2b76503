//! # Sync Queue Repository
//!
//! The outbox: one entry per entity that must reach the server.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  record_sale                                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────── SINGLE TRANSACTION ──────────────────────────┐    │
//! │  │  INSERT pending_transactions                                    │    │
//! │  │  reserve every line                                             │    │
//! │  │  INSERT sync_queue ('transaction', <tx id>)   ← enqueue_in      │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Entry status follows its transaction:                                  │
//! │                                                                         │
//! │    pending ──► processing ──► completed   (synced / conflict)           │
//! │                    │                                                    │
//! │                    ├──► pending           (request-level failure)       │
//! │                    └──► failed            (server rejected it)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transaction entries are driven by the transaction repository through
//! [`follow_reference_in`]; the id-based methods serve other item types.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{parse_opt_ts, parse_ts};
use tern_core::{new_id, SyncItemType, SyncQueueItem, SyncQueueStatus, Timestamp};

const ENTITY: &str = "SyncQueueItem";

const SELECT_COLUMNS: &str = r#"
    SELECT id, item_type, reference_id, priority, payload, attempts,
           last_error, status, created_at, last_attempt_at, completed_at
    FROM sync_queue
"#;

#[derive(Debug, sqlx::FromRow)]
struct SyncQueueRow {
    id: String,
    item_type: SyncItemType,
    reference_id: String,
    priority: i64,
    payload: Option<String>,
    attempts: i64,
    last_error: Option<String>,
    status: SyncQueueStatus,
    created_at: String,
    last_attempt_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<SyncQueueRow> for SyncQueueItem {
    type Error = DbError;

    fn try_from(row: SyncQueueRow) -> DbResult<Self> {
        let created_at = parse_ts(ENTITY, &row.id, &row.created_at)?;
        let last_attempt_at = parse_opt_ts(ENTITY, &row.id, row.last_attempt_at.as_deref())?;
        let completed_at = parse_opt_ts(ENTITY, &row.id, row.completed_at.as_deref())?;
        Ok(SyncQueueItem {
            id: row.id,
            item_type: row.item_type,
            reference_id: row.reference_id,
            priority: row.priority,
            payload: row.payload,
            attempts: row.attempts,
            last_error: row.last_error,
            status: row.status,
            created_at,
            last_attempt_at,
            completed_at,
        })
    }
}

/// Repository for the outbound sync queue.
#[derive(Debug, Clone)]
pub struct SyncQueueRepository {
    pool: SqlitePool,
}

impl SyncQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncQueueRepository { pool }
    }

    /// Queues an entity for synchronization.
    ///
    /// ## Arguments
    /// * `item_type` - Kind of entity
    /// * `reference_id` - The entity's id
    /// * `priority` - Lower runs first
    /// * `payload` - Optional JSON document for types that carry one
    pub async fn enqueue(
        &self,
        item_type: SyncItemType,
        reference_id: &str,
        priority: i64,
        payload: Option<&str>,
        at: Timestamp,
    ) -> DbResult<SyncQueueItem> {
        let mut conn = self.pool.acquire().await?;
        enqueue_in(&mut *conn, item_type, reference_id, priority, payload, at).await
    }

    /// Entries waiting for delivery, by priority then age.
    pub async fn get_pending(&self, limit: u32) -> DbResult<Vec<SyncQueueItem>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE status = 'pending' ORDER BY priority, created_at, id LIMIT ?1"
        );
        let rows: Vec<SyncQueueRow> = sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(SyncQueueItem::try_from).collect()
    }

    pub async fn get_by_reference(
        &self,
        item_type: SyncItemType,
        reference_id: &str,
    ) -> DbResult<Option<SyncQueueItem>> {
        let sql = format!("{SELECT_COLUMNS} WHERE item_type = ?1 AND reference_id = ?2 LIMIT 1");
        let row: Option<SyncQueueRow> = sqlx::query_as(&sql)
            .bind(item_type)
            .bind(reference_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncQueueItem::try_from).transpose()
    }

    pub async fn mark_processing(&self, id: &str, at: Timestamp) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE sync_queue SET status = 'processing', last_attempt_at = ?2 WHERE id = ?1",
        )
        .bind(id)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        ensure_found(result.rows_affected(), id)
    }

    pub async fn mark_completed(&self, id: &str, at: Timestamp) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'completed',
                last_error = NULL,
                completed_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        ensure_found(result.rows_affected(), id)
    }

    /// Records a delivery failure.
    pub async fn mark_failed(&self, id: &str, error: &str, at: Timestamp) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'failed',
                attempts = attempts + 1,
                last_error = ?2,
                last_attempt_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        ensure_found(result.rows_affected(), id)
    }

    /// Counts entries not yet delivered (pending or in flight).
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_queue WHERE status IN ('pending', 'processing')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Deletes completed entries older than `cutoff`.
    ///
    /// ## Returns
    /// Number of deleted entries.
    pub async fn cleanup_completed_older_than(&self, cutoff: Timestamp) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM sync_queue WHERE status = 'completed' AND completed_at < ?1",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn ensure_found(rows_affected: u64, id: &str) -> DbResult<()> {
    if rows_affected == 0 {
        return Err(DbError::not_found(ENTITY, id));
    }
    Ok(())
}

// =============================================================================
// Connection-Level Helpers
// =============================================================================

pub(crate) async fn enqueue_in(
    conn: &mut SqliteConnection,
    item_type: SyncItemType,
    reference_id: &str,
    priority: i64,
    payload: Option<&str>,
    at: Timestamp,
) -> DbResult<SyncQueueItem> {
    let item = SyncQueueItem {
        id: new_id(),
        item_type,
        reference_id: reference_id.to_string(),
        priority,
        payload: payload.map(str::to_string),
        attempts: 0,
        last_error: None,
        status: SyncQueueStatus::Pending,
        created_at: at,
        last_attempt_at: None,
        completed_at: None,
    };

    debug!(item_type = ?item_type, reference_id = %reference_id, "Queuing for sync");

    sqlx::query(
        r#"
        INSERT INTO sync_queue (
            id, item_type, reference_id, priority, payload,
            attempts, last_error, status, created_at, last_attempt_at, completed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL, 'pending', ?6, NULL, NULL)
        "#,
    )
    .bind(&item.id)
    .bind(item.item_type)
    .bind(&item.reference_id)
    .bind(item.priority)
    .bind(&item.payload)
    .bind(item.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(item)
}

/// How an entry moves when its referenced entity changes state.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Follow<'a> {
    Processing,
    Completed,
    Retry(&'a str),
    Failed(&'a str),
}

impl Follow<'_> {
    fn sql(&self) -> &'static str {
        match self {
            Follow::Processing => {
                r#"
                UPDATE sync_queue SET status = 'processing', last_attempt_at = ?3
                WHERE item_type = ?1 AND reference_id = ?2
                "#
            }
            Follow::Completed => {
                r#"
                UPDATE sync_queue SET status = 'completed', last_error = NULL, completed_at = ?3
                WHERE item_type = ?1 AND reference_id = ?2
                "#
            }
            Follow::Retry(_) => {
                r#"
                UPDATE sync_queue SET
                    status = 'pending',
                    attempts = attempts + 1,
                    last_attempt_at = ?3,
                    last_error = ?4
                WHERE item_type = ?1 AND reference_id = ?2
                "#
            }
            Follow::Failed(_) => {
                r#"
                UPDATE sync_queue SET
                    status = 'failed',
                    attempts = attempts + 1,
                    last_attempt_at = ?3,
                    last_error = ?4
                WHERE item_type = ?1 AND reference_id = ?2
                "#
            }
        }
    }

    fn error(&self) -> Option<&str> {
        match self {
            Follow::Retry(error) | Follow::Failed(error) => Some(error),
            Follow::Processing | Follow::Completed => None,
        }
    }
}

/// Moves the entry of `(item_type, reference_id)` along with its entity.
///
/// An entity without an entry is left alone.
pub(crate) async fn follow_reference_in(
    conn: &mut SqliteConnection,
    item_type: SyncItemType,
    reference_id: &str,
    follow: Follow<'_>,
    at: Timestamp,
) -> DbResult<()> {
    let mut query = sqlx::query(follow.sql())
        .bind(item_type)
        .bind(reference_id)
        .bind(at.to_rfc3339());
    if let Some(error) = follow.error() {
        query = query.bind(error);
    }

    let result = query.execute(&mut *conn).await?;
    if result.rows_affected() == 0 {
        debug!(item_type = ?item_type, reference_id = %reference_id, "No outbox entry to update");
    }
    Ok(())
}

/// Puts every in-flight entry of a type back to `pending` after an
/// interrupted cycle.
pub(crate) async fn requeue_processing_in(
    conn: &mut SqliteConnection,
    item_type: SyncItemType,
) -> DbResult<u64> {
    let result = sqlx::query(
        "UPDATE sync_queue SET status = 'pending' WHERE item_type = ?1 AND status = 'processing'",
    )
    .bind(item_type)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Unit Tests
// =============================================================================
