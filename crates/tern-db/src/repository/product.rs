//! # Cached Product Repository
//!
//! The terminal's copy of the catalog and its local stock arithmetic.
//!
//! ## Who Writes What
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  column           written by                                            │
//! │  ──────────────   ─────────────────────────────────────────────────     │
//! │  name, price, ..  catalog sync (upsert / upsert_many)                   │
//! │  server_stock     catalog sync, sync verdicts (transaction repository)  │
//! │  reserved_stock   reservation tracker ONLY                              │
//! │                                                                         │
//! │  local_stock = server_stock − reserved_stock                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::parse_ts;
use tern_core::{CachedProduct, Money};

const ENTITY: &str = "CachedProduct";

const SELECT_COLUMNS: &str = r#"
    SELECT id, sku, barcode, name, unit_price_cents, inventory_id,
           server_stock, reserved_stock, cached_at, store_id, terminal_id
    FROM cached_products
"#;

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    sku: String,
    barcode: Option<String>,
    name: String,
    unit_price_cents: i64,
    inventory_id: String,
    server_stock: i64,
    reserved_stock: i64,
    cached_at: String,
    store_id: String,
    terminal_id: Option<String>,
}

impl TryFrom<ProductRow> for CachedProduct {
    type Error = DbError;

    fn try_from(row: ProductRow) -> DbResult<Self> {
        let cached_at = parse_ts(ENTITY, &row.id, &row.cached_at)?;
        Ok(CachedProduct {
            id: row.id,
            sku: row.sku,
            barcode: row.barcode,
            name: row.name,
            unit_price: Money::from_cents(row.unit_price_cents),
            inventory_id: row.inventory_id,
            server_stock: row.server_stock,
            reserved_stock: row.reserved_stock,
            cached_at,
            store_id: row.store_id,
            terminal_id: row.terminal_id,
        })
    }
}

/// Repository for the cached catalog.
#[derive(Debug, Clone)]
pub struct CachedProductRepository {
    pool: SqlitePool,
}

impl CachedProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CachedProductRepository { pool }
    }

    /// Inserts or refreshes one product.
    ///
    /// `reserved_stock` is never written here: a refresh keeps the local
    /// reservations, and a new product starts with none.
    pub async fn upsert(&self, product: &CachedProduct) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_in(&mut *conn, product).await
    }

    /// Refreshes a batch of products in one durable-store transaction.
    pub async fn upsert_many(&self, products: &[CachedProduct]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for product in products {
            upsert_in(&mut *tx, product).await?;
        }
        tx.commit().await?;

        info!(count = products.len(), "Cached catalog refreshed");
        Ok(products.len())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<CachedProduct>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let row: Option<ProductRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CachedProduct::try_from).transpose()
    }

    pub async fn get_by_sku(&self, store_id: &str, sku: &str) -> DbResult<Option<CachedProduct>> {
        let sql = format!("{SELECT_COLUMNS} WHERE store_id = ?1 AND sku = ?2 LIMIT 1");
        let row: Option<ProductRow> = sqlx::query_as(&sql)
            .bind(store_id)
            .bind(sku)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CachedProduct::try_from).transpose()
    }

    /// Barcode scan lookup.
    pub async fn get_by_barcode(
        &self,
        store_id: &str,
        barcode: &str,
    ) -> DbResult<Option<CachedProduct>> {
        let sql = format!("{SELECT_COLUMNS} WHERE store_id = ?1 AND barcode = ?2 LIMIT 1");
        let row: Option<ProductRow> = sqlx::query_as(&sql)
            .bind(store_id)
            .bind(barcode)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CachedProduct::try_from).transpose()
    }

    /// All cached products for a store, by name.
    pub async fn list_by_store(&self, store_id: &str) -> DbResult<Vec<CachedProduct>> {
        let sql = format!("{SELECT_COLUMNS} WHERE store_id = ?1 ORDER BY name, id");
        let rows: Vec<ProductRow> = sqlx::query_as(&sql)
            .bind(store_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(CachedProduct::try_from).collect()
    }

    /// Removes a product from the cache. Returns whether it existed.
    ///
    /// Reservations pointing at it are left alone; releasing them later is a
    /// logged no-op.
    pub async fn delete(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM cached_products WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// `server_stock − reserved_stock`, unfloored.
    pub async fn local_stock(&self, id: &str) -> DbResult<i64> {
        let stock: Option<i64> = sqlx::query_scalar(
            "SELECT server_stock - reserved_stock FROM cached_products WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        stock.ok_or_else(|| DbError::not_found(ENTITY, id))
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cached_products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Connection-Level Helpers
// =============================================================================

pub(crate) async fn upsert_in(conn: &mut SqliteConnection, product: &CachedProduct) -> DbResult<()> {
    debug!(id = %product.id, sku = %product.sku, server_stock = product.server_stock, "Upserting cached product");

    sqlx::query(
        r#"
        INSERT INTO cached_products (
            id, sku, barcode, name, unit_price_cents, inventory_id,
            server_stock, reserved_stock, cached_at, store_id, terminal_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10)
        ON CONFLICT(id) DO UPDATE SET
            sku = excluded.sku,
            barcode = excluded.barcode,
            name = excluded.name,
            unit_price_cents = excluded.unit_price_cents,
            inventory_id = excluded.inventory_id,
            server_stock = excluded.server_stock,
            cached_at = excluded.cached_at,
            store_id = excluded.store_id,
            terminal_id = excluded.terminal_id
        "#,
    )
    .bind(&product.id)
    .bind(&product.sku)
    .bind(&product.barcode)
    .bind(&product.name)
    .bind(product.unit_price.cents())
    .bind(&product.inventory_id)
    .bind(product.server_stock)
    .bind(product.cached_at.to_rfc3339())
    .bind(&product.store_id)
    .bind(&product.terminal_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Lowers the cached server count after the server accepted a sale.
/// Returns false when the product is no longer cached.
pub(crate) async fn decrement_server_stock_in(
    conn: &mut SqliteConnection,
    product_id: &str,
    quantity: i64,
) -> DbResult<bool> {
    let result = sqlx::query(
        "UPDATE cached_products SET server_stock = MAX(server_stock - ?1, 0) WHERE id = ?2",
    )
    .bind(quantity)
    .bind(product_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Overwrites the cached server count with a figure the server reported.
pub(crate) async fn set_server_stock_in(
    conn: &mut SqliteConnection,
    product_id: &str,
    stock: i64,
) -> DbResult<bool> {
    let result = sqlx::query("UPDATE cached_products SET server_stock = MAX(?1, 0) WHERE id = ?2")
        .bind(stock)
        .bind(product_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Unit Tests
// =============================================================================
