//! # Reservation Tracker
//!
//! Holds stock for sales the server has not ruled on yet.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  record_sale ──► reserve(product, tx, qty)                              │
//! │                   ├── reserved_stock += qty                             │
//! │                   └── upsert (tx, product) reservation                  │
//! │                                                                         │
//! │  pending / syncing / failed   reservations HELD                         │
//! │                                                                         │
//! │  synced / conflict ──► release(tx)                                      │
//! │                   ├── delete every (tx, *) reservation                  │
//! │                   └── reserved_stock = max(reserved_stock − qty, 0)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both directions run as one durable-store transaction, so
//! `reserved_stock` always equals the sum of the reservation rows.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::repository::parse_ts;
use tern_core::{InventoryReservation, Timestamp};

const ENTITY: &str = "InventoryReservation";

#[derive(Debug, sqlx::FromRow)]
struct ReservationRow {
    transaction_id: String,
    product_id: String,
    quantity: i64,
    created_at: String,
}

impl TryFrom<ReservationRow> for InventoryReservation {
    type Error = DbError;

    fn try_from(row: ReservationRow) -> DbResult<Self> {
        let id = format!("{}/{}", row.transaction_id, row.product_id);
        let created_at = parse_ts(ENTITY, &id, &row.created_at)?;
        Ok(InventoryReservation {
            transaction_id: row.transaction_id,
            product_id: row.product_id,
            quantity: row.quantity,
            created_at,
        })
    }
}

/// The reservation tracker.
#[derive(Debug, Clone)]
pub struct ReservationRepository {
    pool: SqlitePool,
}

impl ReservationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReservationRepository { pool }
    }

    /// Holds `quantity` units of a product for a transaction.
    ///
    /// Reserving the same pair twice adds to the existing hold.
    ///
    /// ## Errors
    /// - `InvalidInput` for a zero or negative quantity
    /// - `NotFound` when the product is not cached
    pub async fn reserve(
        &self,
        product_id: &str,
        transaction_id: &str,
        quantity: i64,
        at: Timestamp,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        reserve_in(&mut *tx, product_id, transaction_id, quantity, at).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Drops every hold of a transaction and gives the stock back.
    ///
    /// Returns the released reservations; an empty vector when there were
    /// none.
    pub async fn release(&self, transaction_id: &str) -> DbResult<Vec<InventoryReservation>> {
        let mut tx = self.pool.begin().await?;
        let released = release_in(&mut *tx, transaction_id).await?;
        tx.commit().await?;
        Ok(released)
    }

    pub async fn list_for_transaction(
        &self,
        transaction_id: &str,
    ) -> DbResult<Vec<InventoryReservation>> {
        let rows: Vec<ReservationRow> = sqlx::query_as(
            r#"
            SELECT transaction_id, product_id, quantity, created_at
            FROM inventory_reservations
            WHERE transaction_id = ?1
            ORDER BY product_id
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(InventoryReservation::try_from).collect()
    }

    pub async fn list_for_product(&self, product_id: &str) -> DbResult<Vec<InventoryReservation>> {
        let rows: Vec<ReservationRow> = sqlx::query_as(
            r#"
            SELECT transaction_id, product_id, quantity, created_at
            FROM inventory_reservations
            WHERE product_id = ?1
            ORDER BY created_at, transaction_id
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(InventoryReservation::try_from).collect()
    }

    /// Sum of active holds on a product.
    pub async fn reserved_for_product(&self, product_id: &str) -> DbResult<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(quantity), 0) FROM inventory_reservations WHERE product_id = ?1",
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }
}

// =============================================================================
// Connection-Level Helpers
// =============================================================================

pub(crate) async fn reserve_in(
    conn: &mut SqliteConnection,
    product_id: &str,
    transaction_id: &str,
    quantity: i64,
    at: Timestamp,
) -> DbResult<()> {
    if quantity <= 0 {
        return Err(DbError::InvalidInput(format!(
            "reservation quantity must be positive, got {quantity}"
        )));
    }

    let updated = sqlx::query(
        "UPDATE cached_products SET reserved_stock = reserved_stock + ?1 WHERE id = ?2",
    )
    .bind(quantity)
    .bind(product_id)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(DbError::not_found("CachedProduct", product_id));
    }

    sqlx::query(
        r#"
        INSERT INTO inventory_reservations (transaction_id, product_id, quantity, created_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(transaction_id, product_id) DO UPDATE SET
            quantity = quantity + excluded.quantity
        "#,
    )
    .bind(transaction_id)
    .bind(product_id)
    .bind(quantity)
    .bind(at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    debug!(
        product_id = %product_id,
        transaction_id = %transaction_id,
        quantity,
        "Stock reserved"
    );
    Ok(())
}

pub(crate) async fn release_in(
    conn: &mut SqliteConnection,
    transaction_id: &str,
) -> DbResult<Vec<InventoryReservation>> {
    let rows: Vec<ReservationRow> = sqlx::query_as(
        r#"
        DELETE FROM inventory_reservations
        WHERE transaction_id = ?1
        RETURNING transaction_id, product_id, quantity, created_at
        "#,
    )
    .bind(transaction_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut released = Vec::with_capacity(rows.len());
    for row in rows {
        let updated = sqlx::query(
            "UPDATE cached_products SET reserved_stock = MAX(reserved_stock - ?1, 0) WHERE id = ?2",
        )
        .bind(row.quantity)
        .bind(&row.product_id)
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 0 {
            warn!(
                product_id = %row.product_id,
                transaction_id = %transaction_id,
                "Released reservation for a product no longer cached"
            );
        }

        released.push(InventoryReservation::try_from(row)?);
    }

    debug!(transaction_id = %transaction_id, count = released.len(), "Reservations released");
    Ok(released)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures::{db, now, product};
    use crate::Database;

    async fn assert_stock_identity(db: &Database, product_id: &str) {
        let cached = db.products().get_by_id(product_id).await.unwrap().unwrap();
        let reserved = db.reservations().reserved_for_product(product_id).await.unwrap();
        assert_eq!(cached.reserved_stock, reserved);
        assert_eq!(
            db.products().local_stock(product_id).await.unwrap(),
            cached.server_stock - reserved
        );
    }

    #[tokio::test]
    async fn test_reserve_debits_local_stock() {
        let db = db().await;
        db.products().upsert(&product("cola", 10)).await.unwrap();

        db.reservations().reserve("cola", "tx-1", 3, now()).await.unwrap();
        db.reservations().reserve("cola", "tx-2", 2, now()).await.unwrap();

        assert_eq!(db.products().local_stock("cola").await.unwrap(), 5);
        assert_eq!(db.reservations().list_for_product("cola").await.unwrap().len(), 2);
        assert_stock_identity(&db, "cola").await;
    }

    #[tokio::test]
    async fn test_reserve_same_pair_accumulates() {
        let db = db().await;
        db.products().upsert(&product("cola", 10)).await.unwrap();

        db.reservations().reserve("cola", "tx-1", 3, now()).await.unwrap();
        db.reservations().reserve("cola", "tx-1", 4, now()).await.unwrap();

        let held = db.reservations().list_for_transaction("tx-1").await.unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].quantity, 7);
        assert_stock_identity(&db, "cola").await;
    }

    #[tokio::test]
    async fn test_reserve_rejects_unknown_product_and_bad_quantity() {
        let db = db().await;
        db.products().upsert(&product("cola", 10)).await.unwrap();

        let err = db.reservations().reserve("ghost", "tx-1", 1, now()).await.unwrap_err();
        assert!(err.is_not_found());

        let err = db.reservations().reserve("cola", "tx-1", 0, now()).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput(_)));

        assert!(db.reservations().list_for_transaction("tx-1").await.unwrap().is_empty());
        assert_stock_identity(&db, "cola").await;
    }

    #[tokio::test]
    async fn test_release_restores_stock() {
        let db = db().await;
        db.products()
            .upsert_many(&[product("cola", 10), product("chips", 4)])
            .await
            .unwrap();
        db.reservations().reserve("cola", "tx-1", 3, now()).await.unwrap();
        db.reservations().reserve("chips", "tx-1", 1, now()).await.unwrap();
        db.reservations().reserve("cola", "tx-2", 2, now()).await.unwrap();

        let released = db.reservations().release("tx-1").await.unwrap();

        assert_eq!(released.len(), 2);
        assert_eq!(db.products().local_stock("cola").await.unwrap(), 8);
        assert_eq!(db.products().local_stock("chips").await.unwrap(), 4);
        assert_stock_identity(&db, "cola").await;
        assert_stock_identity(&db, "chips").await;

        // Releasing twice is harmless.
        assert!(db.reservations().release("tx-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_with_missing_product_is_noop() {
        let db = db().await;
        db.products().upsert(&product("cola", 10)).await.unwrap();
        db.reservations().reserve("cola", "tx-1", 3, now()).await.unwrap();
        db.products().delete("cola").await.unwrap();

        let released = db.reservations().release("tx-1").await.unwrap();

        assert_eq!(released.len(), 1);
        assert!(db.reservations().list_for_transaction("tx-1").await.unwrap().is_empty());
    }
}
