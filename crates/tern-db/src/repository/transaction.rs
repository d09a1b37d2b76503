//! # Pending Transaction Repository
//!
//! The durable sale queue and its sync state machine.
//!
//! ## Transaction Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Transaction Lifecycle                             │
//! │                                                                         │
//! │  1. CHECKOUT                                                            │
//! │     └── record_sale() → PendingTransaction { status: Pending }          │
//! │         (insert + reserve every line + outbox entry, ONE transaction)   │
//! │                                                                         │
//! │  2. SYNC CYCLE                                                          │
//! │     └── mark_syncing()        pending / failed  → syncing               │
//! │     └── revert_to_pending()   syncing → pending   (request failed)      │
//! │                               syncing → failed    (attempts at the cap) │
//! │                                                                         │
//! │  3. VERDICT                                                             │
//! │     └── mark_synced()    → synced    release + fold stock into cache    │
//! │     └── mark_conflict()  → conflict  release + fold stock into cache    │
//! │     └── mark_failed()    → failed    reservations HELD                  │
//! │                                                                         │
//! │  4. AFTERCARE                                                           │
//! │     └── acknowledge_conflict()   supervisor signs off                   │
//! │     └── purge_synced_older_than() retention                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every state change also moves the transaction's outbox entry, inside the
//! same durable-store transaction.

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::repository::product::{decrement_server_stock_in, set_server_stock_in};
use crate::repository::reservation::{release_in, reserve_in};
use crate::repository::sync::{enqueue_in, follow_reference_in, requeue_processing_in, Follow};
use crate::repository::{from_json, parse_opt_ts, parse_ts, to_json};
use tern_core::validation::{validate_new_sale, validate_reference};
use tern_core::{
    new_id, ConflictResolution, CoreError, Money, NewSale, PaymentMethod, PendingTransaction,
    SyncItemType, Timestamp, TransactionStatus, TransactionTotals,
};

const ENTITY: &str = "PendingTransaction";

const COLUMNS: &str = r#"
    id, local_receipt_number, terminal_id, store_id, cashier_id, session_id,
    customer_id, items_json, subtotal_cents, tax_cents, discount_cents,
    total_cents, payment_method, notes, created_at, status, attempts,
    last_attempt_at, last_error, server_sale_id, server_sale_number,
    conflict_json, synced_at, snapshot_json
"#;

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: String,
    local_receipt_number: String,
    terminal_id: String,
    store_id: String,
    cashier_id: String,
    session_id: Option<String>,
    customer_id: Option<String>,
    items_json: String,
    subtotal_cents: i64,
    tax_cents: i64,
    discount_cents: i64,
    total_cents: i64,
    payment_method: PaymentMethod,
    notes: Option<String>,
    created_at: String,
    status: TransactionStatus,
    attempts: i64,
    last_attempt_at: Option<String>,
    last_error: Option<String>,
    server_sale_id: Option<String>,
    server_sale_number: Option<String>,
    conflict_json: Option<String>,
    synced_at: Option<String>,
    snapshot_json: String,
}

impl TryFrom<TransactionRow> for PendingTransaction {
    type Error = DbError;

    fn try_from(row: TransactionRow) -> DbResult<Self> {
        let id = row.id.as_str();
        let items = from_json(ENTITY, id, &row.items_json)?;
        let conflict = row
            .conflict_json
            .as_deref()
            .map(|raw| from_json::<ConflictResolution>(ENTITY, id, raw))
            .transpose()?;
        let snapshot = from_json(ENTITY, id, &row.snapshot_json)?;
        let created_at = parse_ts(ENTITY, id, &row.created_at)?;
        let last_attempt_at = parse_opt_ts(ENTITY, id, row.last_attempt_at.as_deref())?;
        let synced_at = parse_opt_ts(ENTITY, id, row.synced_at.as_deref())?;

        Ok(PendingTransaction {
            id: row.id,
            local_receipt_number: row.local_receipt_number,
            terminal_id: row.terminal_id,
            store_id: row.store_id,
            cashier_id: row.cashier_id,
            session_id: row.session_id,
            customer_id: row.customer_id,
            items,
            totals: TransactionTotals {
                subtotal: Money::from_cents(row.subtotal_cents),
                tax: Money::from_cents(row.tax_cents),
                discount: Money::from_cents(row.discount_cents),
                total: Money::from_cents(row.total_cents),
            },
            payment_method: row.payment_method,
            notes: row.notes,
            created_at,
            status: row.status,
            attempts: row.attempts,
            last_attempt_at,
            last_error: row.last_error,
            server_sale_id: row.server_sale_id,
            server_sale_number: row.server_sale_number,
            conflict,
            synced_at,
            snapshot,
        })
    }
}

/// Where a request failure sent the members of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RevertCounts {
    /// Back to `pending` for the next cycle.
    pub requeued: u64,
    /// Out of attempts, now `failed`.
    pub exhausted: u64,
}

/// Number of transactions per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub syncing: i64,
    pub synced: i64,
    pub conflict: i64,
    pub failed: i64,
}

impl StatusCounts {
    /// Transactions the server has not ruled on yet.
    pub fn unresolved(&self) -> i64 {
        self.pending + self.syncing + self.failed
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the pending transaction queue.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    /// Persists a checkout.
    ///
    /// In one durable-store transaction: assigns the next local receipt
    /// number for the terminal and day, inserts the `pending` record,
    /// reserves every line (lines of the same product are summed) and
    /// enqueues the outbox entry. Any failure leaves nothing behind.
    ///
    /// The sale is not refused when it exceeds `local_stock`; the checkout
    /// UI checks stock before calling.
    ///
    /// ## Errors
    /// - `InvalidInput` when the sale fails validation
    /// - `NotFound` when a line names a product that is not cached
    pub async fn record_sale(&self, sale: &NewSale, at: Timestamp) -> DbResult<PendingTransaction> {
        validate_new_sale(sale)?;

        let prefix = receipt_prefix(&sale.terminal_id, at);
        let mut transaction = sale.clone().into_transaction(new_id(), String::new(), at);

        let mut tx = self.pool.begin().await?;

        transaction.local_receipt_number =
            insert_in(&mut *tx, &transaction, ReceiptNumber::Next(&prefix)).await?;
        for (product_id, quantity) in transaction.reservation_quantities() {
            reserve_in(&mut *tx, &product_id, &transaction.id, quantity, at).await?;
        }
        enqueue_in(&mut *tx, SyncItemType::Transaction, &transaction.id, 0, None, at).await?;

        tx.commit().await?;

        info!(
            id = %transaction.id,
            receipt = %transaction.local_receipt_number,
            lines = transaction.items.len(),
            total = %transaction.totals.total,
            "Sale recorded offline"
        );
        Ok(transaction)
    }

    /// Inserts a complete record as-is, for restores and imports.
    ///
    /// Unresolved records get their reservations and a pending outbox entry
    /// so the usual invariants hold.
    pub async fn insert(&self, transaction: &PendingTransaction) -> DbResult<()> {
        debug!(id = %transaction.id, status = %transaction.status, "Inserting transaction");

        let mut tx = self.pool.begin().await?;
        insert_in(
            &mut *tx,
            transaction,
            ReceiptNumber::Given(&transaction.local_receipt_number),
        )
        .await?;

        if transaction.status.holds_reservations() {
            for (product_id, quantity) in transaction.reservation_quantities() {
                reserve_in(&mut *tx, &product_id, &transaction.id, quantity, transaction.created_at)
                    .await?;
            }
            enqueue_in(
                &mut *tx,
                SyncItemType::Transaction,
                &transaction.id,
                0,
                None,
                transaction.created_at,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<PendingTransaction>> {
        let sql = format!("SELECT {COLUMNS} FROM pending_transactions WHERE id = ?1");
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(PendingTransaction::try_from).transpose()
    }

    /// Transactions in one status, oldest first.
    pub async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> DbResult<Vec<PendingTransaction>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM pending_transactions WHERE status = ?1 ORDER BY created_at, id"
        );
        let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;

        decode_all(rows)
    }

    /// A store's transactions, newest first.
    pub async fn list_by_store(&self, store_id: &str, limit: u32) -> DbResult<Vec<PendingTransaction>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM pending_transactions
            WHERE store_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#
        );
        let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
            .bind(store_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        decode_all(rows)
    }

    /// What the next sync cycle should submit: `pending`, plus `failed`
    /// below the attempt cap, oldest first.
    pub async fn list_retriable(&self, max_attempts: i64) -> DbResult<Vec<PendingTransaction>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM pending_transactions
            WHERE status = 'pending' OR (status = 'failed' AND attempts < ?1)
            ORDER BY created_at, id
            "#
        );
        let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
            .bind(max_attempts)
            .fetch_all(&self.pool)
            .await?;

        decode_all(rows)
    }

    /// Failed transactions at the attempt cap and unacknowledged conflicts.
    pub async fn list_needing_attention(
        &self,
        max_attempts: i64,
    ) -> DbResult<Vec<PendingTransaction>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM pending_transactions
            WHERE (status = 'failed' AND attempts >= ?1) OR status = 'conflict'
            ORDER BY created_at, id
            "#
        );
        let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
            .bind(max_attempts)
            .fetch_all(&self.pool)
            .await?;

        Ok(decode_all(rows)?
            .into_iter()
            .filter(|transaction| transaction.needs_attention(max_attempts))
            .collect())
    }

    /// Moves a batch into flight. Only `pending` and `failed` members move.
    ///
    /// ## Returns
    /// Number of transactions marked.
    pub async fn mark_syncing(&self, ids: &[String], at: Timestamp) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut marked = 0;

        for id in ids {
            let result = sqlx::query(
                r#"
                UPDATE pending_transactions SET status = 'syncing', last_attempt_at = ?2
                WHERE id = ?1 AND status IN ('pending', 'failed')
                "#,
            )
            .bind(id)
            .bind(at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                follow_reference_in(&mut *tx, SyncItemType::Transaction, id, Follow::Processing, at)
                    .await?;
                marked += 1;
            }
        }

        tx.commit().await?;
        debug!(requested = ids.len(), marked, "Batch marked syncing");
        Ok(marked)
    }

    /// Puts an in-flight batch back after a request-level failure.
    ///
    /// Attempts are counted and the error stored; reservations stay. A
    /// member whose attempts reach `max_attempts` becomes `failed` instead
    /// of `pending`, which takes it out of retry and onto the attention
    /// list.
    pub async fn revert_to_pending(
        &self,
        ids: &[String],
        error: &str,
        max_attempts: i64,
        at: Timestamp,
    ) -> DbResult<RevertCounts> {
        let mut tx = self.pool.begin().await?;
        let mut counts = RevertCounts::default();

        for id in ids {
            let status: Option<TransactionStatus> = sqlx::query_scalar(
                r#"
                UPDATE pending_transactions SET
                    status = CASE WHEN attempts + 1 >= ?4 THEN 'failed' ELSE 'pending' END,
                    attempts = attempts + 1,
                    last_error = ?2,
                    last_attempt_at = ?3
                WHERE id = ?1 AND status = 'syncing'
                RETURNING status
                "#,
            )
            .bind(id)
            .bind(error)
            .bind(at.to_rfc3339())
            .bind(max_attempts)
            .fetch_optional(&mut *tx)
            .await?;

            let follow = match status {
                None => continue,
                Some(TransactionStatus::Failed) => {
                    counts.exhausted += 1;
                    Follow::Failed(error)
                }
                Some(_) => {
                    counts.requeued += 1;
                    Follow::Retry(error)
                }
            };
            follow_reference_in(&mut *tx, SyncItemType::Transaction, id, follow, at).await?;
        }

        tx.commit().await?;
        warn!(
            requeued = counts.requeued,
            exhausted = counts.exhausted,
            error = %error,
            "Batch reverted after request failure"
        );
        Ok(counts)
    }

    /// Records the server's acceptance.
    ///
    /// Releases the reservations, marks every line fully fulfilled, lowers
    /// the cached server stock by what was sold and completes the outbox
    /// entry.
    pub async fn mark_synced(
        &self,
        id: &str,
        server_sale_id: &str,
        server_sale_number: &str,
        at: Timestamp,
    ) -> DbResult<PendingTransaction> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE pending_transactions SET
                status = 'synced',
                server_sale_id = ?2,
                server_sale_number = ?3,
                synced_at = ?4,
                last_error = NULL
            WHERE id = ?1 AND status IN ('pending', 'syncing', 'failed')
            RETURNING {COLUMNS}
            "#
        );
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(server_sale_id)
            .bind(server_sale_number)
            .bind(at.to_rfc3339())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(self.refusal(id, "mark synced").await);
        };

        let mut transaction = PendingTransaction::try_from(row)?;
        transaction.apply_fulfillment(None);
        finalize_in(&mut *tx, &transaction, at).await?;

        tx.commit().await?;
        info!(id = %id, sale_number = %server_sale_number, "Transaction synced");
        Ok(transaction)
    }

    /// Records an acceptance with reduced fulfillment.
    ///
    /// Like [`mark_synced`](Self::mark_synced), plus the resolution is stored
    /// and the cached server stock of conflicting products is reset from the
    /// figure the server reported.
    pub async fn mark_conflict(
        &self,
        id: &str,
        server_sale_id: &str,
        server_sale_number: &str,
        conflict: &ConflictResolution,
        at: Timestamp,
    ) -> DbResult<PendingTransaction> {
        let conflict_json = to_json(ENTITY, id, conflict)?;
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE pending_transactions SET
                status = 'conflict',
                server_sale_id = ?2,
                server_sale_number = ?3,
                synced_at = ?4,
                conflict_json = ?5,
                last_error = NULL
            WHERE id = ?1 AND status IN ('pending', 'syncing', 'failed')
            RETURNING {COLUMNS}
            "#
        );
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(server_sale_id)
            .bind(server_sale_number)
            .bind(at.to_rfc3339())
            .bind(conflict_json)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(self.refusal(id, "mark conflict").await);
        };

        let mut transaction = PendingTransaction::try_from(row)?;
        transaction.apply_fulfillment(Some(conflict));
        finalize_in(&mut *tx, &transaction, at).await?;

        tx.commit().await?;
        info!(
            id = %id,
            sale_number = %server_sale_number,
            refund = %conflict.refund_amount,
            acknowledged = conflict.is_acknowledged(),
            "Transaction synced with conflict"
        );
        Ok(transaction)
    }

    /// Records a rejection of this transaction alone. Reservations stay.
    pub async fn mark_failed(&self, id: &str, error: &str, at: Timestamp) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE pending_transactions SET
                status = 'failed',
                attempts = attempts + 1,
                last_error = ?2,
                last_attempt_at = ?3
            WHERE id = ?1 AND status IN ('pending', 'syncing', 'failed')
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.refusal(id, "mark failed").await);
        }

        follow_reference_in(&mut *tx, SyncItemType::Transaction, id, Follow::Failed(error), at)
            .await?;
        tx.commit().await?;

        warn!(id = %id, error = %error, "Transaction failed to sync");
        Ok(())
    }

    /// Supervisor sign-off on a conflict.
    ///
    /// Acknowledging twice keeps the first sign-off.
    ///
    /// ## Errors
    /// - `NotFound` for an unknown transaction
    /// - `InvalidState` when the transaction is not in `conflict`
    pub async fn acknowledge_conflict(
        &self,
        id: &str,
        supervisor_id: &str,
        at: Timestamp,
    ) -> DbResult<PendingTransaction> {
        validate_reference("supervisor_id", supervisor_id).map_err(CoreError::from)?;

        let mut tx = self.pool.begin().await?;

        // No-op write first so the row is read under the write lock.
        let sql = format!(
            "UPDATE pending_transactions SET status = status WHERE id = ?1 RETURNING {COLUMNS}"
        );
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(DbError::not_found(ENTITY, id));
        };
        let mut transaction = PendingTransaction::try_from(row)?;

        if transaction.status != TransactionStatus::Conflict {
            tx.rollback().await?;
            return Err(DbError::invalid_state(
                ENTITY,
                id,
                transaction.status,
                "acknowledge conflict",
            ));
        }

        let Some(conflict) = transaction.conflict.as_mut() else {
            tx.rollback().await?;
            return Err(DbError::corrupt(ENTITY, id, "conflict status without resolution"));
        };

        if conflict.is_acknowledged() {
            tx.rollback().await?;
            debug!(id = %id, "Conflict already acknowledged");
            return Ok(transaction);
        }

        conflict.acknowledged_by = Some(supervisor_id.to_string());
        conflict.acknowledged_at = Some(at);
        let conflict_json = to_json(ENTITY, id, &*conflict)?;

        sqlx::query("UPDATE pending_transactions SET conflict_json = ?2 WHERE id = ?1")
            .bind(id)
            .bind(conflict_json)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(id = %id, supervisor_id = %supervisor_id, "Conflict acknowledged");
        Ok(transaction)
    }

    /// Returns `syncing` leftovers of an interrupted cycle to `pending`.
    ///
    /// No attempt is counted: the request never got a definite outcome.
    pub async fn recover_interrupted(&self) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        let result =
            sqlx::query("UPDATE pending_transactions SET status = 'pending' WHERE status = 'syncing'")
                .execute(&mut *tx)
                .await?;
        requeue_processing_in(&mut *tx, SyncItemType::Transaction).await?;

        tx.commit().await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!(count = recovered, "Recovered transactions left syncing by an interrupted cycle");
        }
        Ok(recovered)
    }

    /// Deletes a transaction with its reservations and outbox entry.
    /// Returns whether it existed.
    pub async fn delete(&self, id: &str) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM pending_transactions WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        release_in(&mut *tx, id).await?;
        sqlx::query("DELETE FROM sync_queue WHERE item_type = ?1 AND reference_id = ?2")
            .bind(SyncItemType::Transaction)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(id = %id, "Transaction deleted");
        Ok(true)
    }

    /// Retention: deletes `synced` transactions synced before `cutoff`,
    /// with their outbox entries. Conflicts are kept.
    pub async fn purge_synced_older_than(&self, cutoff: Timestamp) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            DELETE FROM pending_transactions
            WHERE status = 'synced' AND synced_at < ?1
            RETURNING id
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&mut *tx)
        .await?;

        for id in &ids {
            sqlx::query("DELETE FROM sync_queue WHERE item_type = ?1 AND reference_id = ?2")
                .bind(SyncItemType::Transaction)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(count = ids.len(), cutoff = %cutoff, "Purged old synced transactions");
        Ok(ids.len() as u64)
    }

    pub async fn count_by_status(&self) -> DbResult<StatusCounts> {
        let rows: Vec<(TransactionStatus, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM pending_transactions GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status {
                TransactionStatus::Pending => counts.pending = count,
                TransactionStatus::Syncing => counts.syncing = count,
                TransactionStatus::Synced => counts.synced = count,
                TransactionStatus::Conflict => counts.conflict = count,
                TransactionStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    /// Explains why a state change matched no row. Must run outside any
    /// open transaction.
    async fn refusal(&self, id: &str, operation: &str) -> DbError {
        let status: Result<Option<TransactionStatus>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM pending_transactions WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;

        match status {
            Ok(Some(status)) => DbError::invalid_state(ENTITY, id, status, operation),
            Ok(None) => DbError::not_found(ENTITY, id),
            Err(e) => e.into(),
        }
    }
}

fn decode_all(rows: Vec<TransactionRow>) -> DbResult<Vec<PendingTransaction>> {
    rows.into_iter().map(PendingTransaction::try_from).collect()
}

// =============================================================================
// Receipt Numbers
// =============================================================================

/// `YYYYMMDD-<terminal code>-`; the daily sequence follows.
fn receipt_prefix(terminal_id: &str, at: Timestamp) -> String {
    let tail: Vec<char> = terminal_id.chars().rev().take(2).collect();
    let code: String = match tail.as_slice() {
        [last, before] => [*before, *last].iter().collect(),
        [last] => ['0', *last].iter().collect(),
        _ => "00".to_string(),
    };

    format!("{}-{}-", at.as_datetime().format("%Y%m%d"), code.to_uppercase())
}

enum ReceiptNumber<'a> {
    /// Allocate the next number under this prefix.
    Next(&'a str),
    Given(&'a str),
}

/// Inserts the record and returns the receipt number it was stored under.
async fn insert_in(
    conn: &mut SqliteConnection,
    transaction: &PendingTransaction,
    receipt: ReceiptNumber<'_>,
) -> DbResult<String> {
    let (receipt_expr, receipt_value) = match receipt {
        ReceiptNumber::Next(prefix) => (
            r#"?2 || printf('%04d', COALESCE((
                SELECT MAX(CAST(substr(local_receipt_number, length(?2) + 1) AS INTEGER))
                FROM pending_transactions
                WHERE substr(local_receipt_number, 1, length(?2)) = ?2
            ), 0) + 1)"#,
            prefix,
        ),
        ReceiptNumber::Given(number) => ("?2", number),
    };

    let id = transaction.id.as_str();
    let sql = format!(
        r#"
        INSERT INTO pending_transactions ({COLUMNS}) VALUES (
            ?1, {receipt_expr}, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10, ?11,
            ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20, ?21,
            ?22, ?23, ?24
        )
        RETURNING local_receipt_number
        "#
    );

    let conflict_json = transaction
        .conflict
        .as_ref()
        .map(|conflict| to_json(ENTITY, id, conflict))
        .transpose()?;

    let number: String = sqlx::query_scalar(&sql)
        .bind(id)
        .bind(receipt_value)
        .bind(&transaction.terminal_id)
        .bind(&transaction.store_id)
        .bind(&transaction.cashier_id)
        .bind(&transaction.session_id)
        .bind(&transaction.customer_id)
        .bind(to_json(ENTITY, id, &transaction.items)?)
        .bind(transaction.totals.subtotal.cents())
        .bind(transaction.totals.tax.cents())
        .bind(transaction.totals.discount.cents())
        .bind(transaction.totals.total.cents())
        .bind(transaction.payment_method)
        .bind(&transaction.notes)
        .bind(transaction.created_at.to_rfc3339())
        .bind(transaction.status)
        .bind(transaction.attempts)
        .bind(transaction.last_attempt_at.map(|t| t.to_rfc3339()))
        .bind(&transaction.last_error)
        .bind(&transaction.server_sale_id)
        .bind(&transaction.server_sale_number)
        .bind(conflict_json)
        .bind(transaction.synced_at.map(|t| t.to_rfc3339()))
        .bind(to_json(ENTITY, id, &transaction.snapshot)?)
        .fetch_one(&mut *conn)
        .await?;

    Ok(number)
}

// =============================================================================
// Finalization
// =============================================================================

/// Shared tail of `mark_synced` / `mark_conflict`.
///
/// Stores the fulfilled lines, releases the reservations, folds the verdict
/// into the cached server stock and completes the outbox entry.
async fn finalize_in(
    conn: &mut SqliteConnection,
    transaction: &PendingTransaction,
    at: Timestamp,
) -> DbResult<()> {
    let id = transaction.id.as_str();

    sqlx::query("UPDATE pending_transactions SET items_json = ?2 WHERE id = ?1")
        .bind(id)
        .bind(to_json(ENTITY, id, &transaction.items)?)
        .execute(&mut *conn)
        .await?;

    release_in(&mut *conn, id).await?;

    let mut sold: BTreeMap<&str, i64> = BTreeMap::new();
    for item in &transaction.items {
        *sold.entry(item.product_id.as_str()).or_insert(0) += item.effective_quantity();
    }

    // Affected lines are a product's last lines, so what the last one left
    // over is what the server has after this sale.
    let left_over: BTreeMap<&str, i64> = transaction
        .conflict
        .iter()
        .flat_map(|conflict| conflict.items.iter())
        .map(|line| {
            let remaining = line.server_stock - line.fulfilled_quantity;
            (line.product_id.as_str(), remaining)
        })
        .collect();

    for (product_id, quantity) in sold {
        let cached = match left_over.get(product_id) {
            Some(remaining) => set_server_stock_in(&mut *conn, product_id, *remaining).await?,
            None => decrement_server_stock_in(&mut *conn, product_id, quantity).await?,
        };
        if !cached {
            debug!(product_id = %product_id, transaction_id = %id, "Sold product no longer cached");
        }
    }

    follow_reference_in(&mut *conn, SyncItemType::Transaction, id, Follow::Completed, at).await
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures::{at, db, line, now, product, sale};
    use crate::Database;
    use tern_core::conflict::{resolve, StockSnapshot};
    use tern_core::{ConflictType, SyncQueueStatus};

    async fn seeded() -> Database {
        let db = db().await;
        db.products()
            .upsert_many(&[product("cola", 10), product("chips", 4)])
            .await
            .unwrap();
        db
    }

    async fn outbox_status(db: &Database, id: &str) -> SyncQueueStatus {
        db.sync_queue()
            .get_by_reference(SyncItemType::Transaction, id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[test]
    fn test_receipt_prefix() {
        assert_eq!(receipt_prefix("T-01", now()), "20260301-01-");
        assert_eq!(receipt_prefix("7", now()), "20260301-07-");
        assert_eq!(receipt_prefix("", now()), "20260301-00-");
        assert_eq!(receipt_prefix("front-ab", now()), "20260301-AB-");
    }

    #[tokio::test]
    async fn test_record_sale_reserves_and_enqueues() {
        let db = seeded().await;
        let repo = db.transactions();

        let first = repo
            .record_sale(&sale(vec![line("cola", 2), line("chips", 1), line("cola", 3)]), now())
            .await
            .unwrap();

        assert_eq!(first.status, TransactionStatus::Pending);
        assert_eq!(first.local_receipt_number, "20260301-01-0001");
        assert_eq!(first.totals.total, Money::from_cents(600));
        assert_eq!(db.products().local_stock("cola").await.unwrap(), 5);
        assert_eq!(db.products().local_stock("chips").await.unwrap(), 3);

        let held = db.reservations().list_for_transaction(&first.id).await.unwrap();
        assert_eq!(held.len(), 2);
        assert_eq!(outbox_status(&db, &first.id).await, SyncQueueStatus::Pending);

        let stored = repo.get_by_id(&first.id).await.unwrap().unwrap();
        assert_eq!(stored, first);

        let second = repo
            .record_sale(&sale(vec![line("cola", 1)]), at("2026-03-01T17:45:00Z"))
            .await
            .unwrap();
        assert_eq!(second.local_receipt_number, "20260301-01-0002");

        let next_day = repo
            .record_sale(&sale(vec![line("cola", 1)]), at("2026-03-02T08:00:00Z"))
            .await
            .unwrap();
        assert_eq!(next_day.local_receipt_number, "20260302-01-0001");
    }

    #[tokio::test]
    async fn test_record_sale_is_all_or_nothing() {
        let db = seeded().await;
        let repo = db.transactions();

        let err = repo
            .record_sale(&sale(vec![line("cola", 2), line("ghost", 1)]), now())
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(repo.count_by_status().await.unwrap(), StatusCounts::default());
        assert_eq!(db.products().local_stock("cola").await.unwrap(), 10);
        assert_eq!(db.sync_queue().count_pending().await.unwrap(), 0);

        let err = repo.record_sale(&sale(vec![]), now()).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput(_)));

        let mut overpriced = line("cola", 3);
        overpriced.unit_price = Money::from_cents(i64::MAX / 2);
        let err = repo.record_sale(&sale(vec![overpriced]), now()).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput(_)));
        assert_eq!(db.products().local_stock("cola").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_request_failure_keeps_reservations() {
        let db = seeded().await;
        let repo = db.transactions();
        let tx = repo.record_sale(&sale(vec![line("cola", 2)]), now()).await.unwrap();
        let ids = vec![tx.id.clone()];

        assert_eq!(repo.mark_syncing(&ids, now()).await.unwrap(), 1);
        assert_eq!(outbox_status(&db, &tx.id).await, SyncQueueStatus::Processing);
        assert!(repo.list_retriable(5).await.unwrap().is_empty());

        let counts = repo.revert_to_pending(&ids, "connection refused", 5, now()).await.unwrap();
        assert_eq!(counts, RevertCounts { requeued: 1, exhausted: 0 });

        let reverted = repo.get_by_id(&tx.id).await.unwrap().unwrap();
        assert_eq!(reverted.status, TransactionStatus::Pending);
        assert_eq!(reverted.attempts, 1);
        assert_eq!(reverted.last_error.as_deref(), Some("connection refused"));
        assert_eq!(db.products().local_stock("cola").await.unwrap(), 8);
        assert_eq!(outbox_status(&db, &tx.id).await, SyncQueueStatus::Pending);
        assert_eq!(repo.list_retriable(5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_request_failure_at_attempt_cap_fails_transaction() {
        let db = seeded().await;
        let repo = db.transactions();
        let tx = repo.record_sale(&sale(vec![line("cola", 2)]), now()).await.unwrap();
        let ids = vec![tx.id.clone()];

        for attempt in 1..=2 {
            repo.mark_syncing(&ids, now()).await.unwrap();
            let counts = repo.revert_to_pending(&ids, "timeout", 3, now()).await.unwrap();
            assert_eq!(counts.requeued, 1, "attempt {attempt}");
        }

        repo.mark_syncing(&ids, now()).await.unwrap();
        let counts = repo.revert_to_pending(&ids, "timeout", 3, now()).await.unwrap();
        assert_eq!(counts, RevertCounts { requeued: 0, exhausted: 1 });

        let exhausted = repo.get_by_id(&tx.id).await.unwrap().unwrap();
        assert_eq!(exhausted.status, TransactionStatus::Failed);
        assert_eq!(exhausted.attempts, 3);
        assert!(repo.list_retriable(3).await.unwrap().is_empty());
        assert_eq!(repo.list_needing_attention(3).await.unwrap().len(), 1);
        assert_eq!(db.products().local_stock("cola").await.unwrap(), 8);
        assert_eq!(outbox_status(&db, &tx.id).await, SyncQueueStatus::Failed);
    }

    #[tokio::test]
    async fn test_mark_synced_releases_and_folds_stock() {
        let db = seeded().await;
        let repo = db.transactions();
        let tx = repo
            .record_sale(&sale(vec![line("cola", 2), line("cola", 1)]), now())
            .await
            .unwrap();
        repo.mark_syncing(&[tx.id.clone()], now()).await.unwrap();

        let synced = repo.mark_synced(&tx.id, "sale-9", "S-0009", now()).await.unwrap();

        assert_eq!(synced.status, TransactionStatus::Synced);
        assert_eq!(synced.server_sale_number.as_deref(), Some("S-0009"));
        assert!(synced.items.iter().all(|i| i.fulfilled_quantity == Some(i.requested_quantity)));
        assert!(db.reservations().list_for_transaction(&tx.id).await.unwrap().is_empty());

        let cola = db.products().get_by_id("cola").await.unwrap().unwrap();
        assert_eq!(cola.server_stock, 7);
        assert_eq!(cola.reserved_stock, 0);
        assert_eq!(outbox_status(&db, &tx.id).await, SyncQueueStatus::Completed);

        // Never reselected, and a second verdict is refused.
        assert!(repo.list_retriable(5).await.unwrap().is_empty());
        let err = repo.mark_synced(&tx.id, "sale-9", "S-0009", now()).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState { .. }));
        let err = repo.mark_synced("ghost", "s", "n", now()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_mark_conflict_applies_fulfillment() {
        let db = seeded().await;
        let repo = db.transactions();
        let tx = repo
            .record_sale(&sale(vec![line("cola", 8), line("chips", 2)]), now())
            .await
            .unwrap();

        let snapshot: StockSnapshot = [("cola", 5), ("chips", 4)].into_iter().collect();
        let conflict = resolve(&tx.items, &snapshot, now()).conflict.unwrap();
        assert_eq!(conflict.conflict_type, ConflictType::StockShortage);

        let stored = repo
            .mark_conflict(&tx.id, "sale-1", "S-0001", &conflict, now())
            .await
            .unwrap();

        assert_eq!(stored.status, TransactionStatus::Conflict);
        assert_eq!(stored.items[0].fulfilled_quantity, Some(5));
        assert_eq!(stored.items[1].fulfilled_quantity, Some(2));
        assert_eq!(stored.conflict.as_ref(), Some(&conflict));

        let cola = db.products().get_by_id("cola").await.unwrap().unwrap();
        assert_eq!(cola.server_stock, 0);
        assert_eq!(cola.reserved_stock, 0);
        let chips = db.products().get_by_id("chips").await.unwrap().unwrap();
        assert_eq!(chips.server_stock, 2);

        let attention = repo.list_needing_attention(5).await.unwrap();
        assert_eq!(attention.len(), 1);
        assert_eq!(attention[0].id, tx.id);
    }

    #[tokio::test]
    async fn test_acknowledge_conflict() {
        let db = seeded().await;
        let repo = db.transactions();
        let tx = repo.record_sale(&sale(vec![line("chips", 6)]), now()).await.unwrap();
        let snapshot: StockSnapshot = [("chips", 0)].into_iter().collect();
        let conflict = resolve(&tx.items, &snapshot, now()).conflict.unwrap();
        repo.mark_conflict(&tx.id, "sale-1", "S-0001", &conflict, now())
            .await
            .unwrap();

        let acked = repo
            .acknowledge_conflict(&tx.id, "supervisor-1", at("2026-03-01T10:00:00Z"))
            .await
            .unwrap();
        let resolution = acked.conflict.unwrap();
        assert_eq!(resolution.acknowledged_by.as_deref(), Some("supervisor-1"));
        assert_eq!(resolution.acknowledged_at, Some(at("2026-03-01T10:00:00Z")));
        assert!(repo.list_needing_attention(5).await.unwrap().is_empty());

        // The first sign-off stands.
        let again = repo.acknowledge_conflict(&tx.id, "supervisor-2", now()).await.unwrap();
        assert_eq!(
            again.conflict.unwrap().acknowledged_by.as_deref(),
            Some("supervisor-1")
        );

        let pending = repo.record_sale(&sale(vec![line("cola", 1)]), now()).await.unwrap();
        let err = repo
            .acknowledge_conflict(&pending.id, "supervisor-1", now())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidState { .. }));

        let err = repo.acknowledge_conflict("ghost", "supervisor-1", now()).await.unwrap_err();
        assert!(err.is_not_found());
        let err = repo.acknowledge_conflict(&tx.id, " ", now()).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_failed_retries_until_cap() {
        let db = seeded().await;
        let repo = db.transactions();
        let tx = repo.record_sale(&sale(vec![line("cola", 1)]), now()).await.unwrap();

        for attempt in 1..=3 {
            repo.mark_syncing(&[tx.id.clone()], now()).await.unwrap();
            repo.mark_failed(&tx.id, "invalid cashier", now()).await.unwrap();
            let failed = repo.get_by_id(&tx.id).await.unwrap().unwrap();
            assert_eq!(failed.attempts, attempt);
        }

        assert_eq!(outbox_status(&db, &tx.id).await, SyncQueueStatus::Failed);
        assert_eq!(db.products().local_stock("cola").await.unwrap(), 9);
        assert_eq!(repo.list_retriable(4).await.unwrap().len(), 1);
        assert!(repo.list_retriable(3).await.unwrap().is_empty());
        assert!(repo.list_needing_attention(4).await.unwrap().is_empty());
        assert_eq!(repo.list_needing_attention(3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let db = seeded().await;
        let repo = db.transactions();
        let a = repo.record_sale(&sale(vec![line("cola", 1)]), now()).await.unwrap();
        let b = repo.record_sale(&sale(vec![line("cola", 1)]), now()).await.unwrap();
        repo.mark_syncing(&[a.id.clone(), b.id.clone()], now()).await.unwrap();

        assert_eq!(repo.recover_interrupted().await.unwrap(), 2);

        let counts = repo.count_by_status().await.unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.syncing, 0);
        let recovered = repo.get_by_id(&a.id).await.unwrap().unwrap();
        assert_eq!(recovered.attempts, 0);
        assert_eq!(outbox_status(&db, &a.id).await, SyncQueueStatus::Pending);
    }

    #[tokio::test]
    async fn test_purge_and_delete() {
        let db = seeded().await;
        let repo = db.transactions();
        let old = repo.record_sale(&sale(vec![line("cola", 1)]), now()).await.unwrap();
        let recent = repo.record_sale(&sale(vec![line("cola", 1)]), now()).await.unwrap();
        let open = repo.record_sale(&sale(vec![line("chips", 1)]), now()).await.unwrap();
        repo.mark_synced(&old.id, "s1", "S-1", at("2026-01-01T00:00:00Z"))
            .await
            .unwrap();
        repo.mark_synced(&recent.id, "s2", "S-2", at("2026-02-28T00:00:00Z"))
            .await
            .unwrap();

        let purged = repo
            .purge_synced_older_than(at("2026-02-01T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(repo.get_by_id(&old.id).await.unwrap().is_none());
        assert!(db
            .sync_queue()
            .get_by_reference(SyncItemType::Transaction, &old.id)
            .await
            .unwrap()
            .is_none());

        assert!(repo.delete(&open.id).await.unwrap());
        assert!(!repo.delete(&open.id).await.unwrap());
        assert_eq!(db.products().local_stock("chips").await.unwrap(), 4);

        let listed = repo.list_by_store("store-1", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, recent.id);
    }

    #[tokio::test]
    async fn test_insert_restores_reservations() {
        let db = seeded().await;
        let repo = db.transactions();
        let mut restored = sale(vec![line("cola", 4)]).into_transaction(
            "tx-restored".to_string(),
            "20260228-01-0007".to_string(),
            at("2026-02-28T12:00:00Z"),
        );
        restored.status = TransactionStatus::Failed;
        restored.attempts = 2;

        repo.insert(&restored).await.unwrap();

        assert_eq!(repo.get_by_id("tx-restored").await.unwrap().unwrap(), restored);
        assert_eq!(db.products().local_stock("cola").await.unwrap(), 6);
        assert_eq!(repo.list_by_status(TransactionStatus::Failed).await.unwrap().len(), 1);

        let err = repo.insert(&restored).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        use crate::pool::DbConfig;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terminal.db");

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        db.products().upsert(&product("cola", 10)).await.unwrap();
        let tx = db
            .transactions()
            .record_sale(&sale(vec![line("cola", 3)]), now())
            .await
            .unwrap();
        db.close().await;

        let reopened = Database::new(DbConfig::new(&path)).await.unwrap();
        let stored = reopened.transactions().get_by_id(&tx.id).await.unwrap().unwrap();
        assert_eq!(stored, tx);
        assert_eq!(reopened.products().local_stock("cola").await.unwrap(), 7);
    }
}
