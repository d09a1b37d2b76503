//! # Repository Module
//!
//! Durable-store repositories for the offline terminal.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Caller                                                                 │
//! │       │  db.transactions().record_sale(sale, now)                       │
//! │       ▼                                                                 │
//! │  TransactionRepository ──┬── reservation::reserve_in  (same tx)         │
//! │                          └── sync::enqueue_in         (same tx)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (one BEGIN ... COMMIT)                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations that span tables expose `*_in(conn, ..)` helpers taking a
//! `&mut SqliteConnection`, so another repository can run them inside its
//! own transaction.
//!
//! Every multi-statement transaction starts with a write so SQLite takes
//! the write lock up front instead of failing a read-to-write upgrade.
//!
//! ## Available Repositories
//!
//! - [`product::CachedProductRepository`] - Cached catalog and local stock
//! - [`transaction::TransactionRepository`] - Sale queue and its state machine
//! - [`reservation::ReservationRepository`] - Reservation tracker
//! - [`sync::SyncQueueRepository`] - Outbox
//! - [`metadata::SyncMetadataRepository`] - Key/value sync bookkeeping

pub mod metadata;
pub mod product;
pub mod reservation;
pub mod sync;
pub mod transaction;

use serde::de::DeserializeOwned;
use tern_core::Timestamp;

use crate::error::{DbError, DbResult};

// =============================================================================
// Row Decoding Helpers
// =============================================================================

/// Parses a stored timestamp column.
pub(crate) fn parse_ts(entity: &str, id: &str, raw: &str) -> DbResult<Timestamp> {
    Timestamp::parse(raw).map_err(|e| DbError::corrupt(entity, id, e))
}

pub(crate) fn parse_opt_ts(entity: &str, id: &str, raw: Option<&str>) -> DbResult<Option<Timestamp>> {
    raw.map(|value| parse_ts(entity, id, value)).transpose()
}

/// Decodes a JSON document column.
pub(crate) fn from_json<T: DeserializeOwned>(entity: &str, id: &str, raw: &str) -> DbResult<T> {
    serde_json::from_str(raw).map_err(|e| DbError::corrupt(entity, id, e))
}

/// Encodes a JSON document column.
pub(crate) fn to_json<T: serde::Serialize>(entity: &str, id: &str, value: &T) -> DbResult<String> {
    serde_json::to_string(value).map_err(|e| DbError::corrupt(entity, id, e))
}

// =============================================================================
// Test Fixtures
// =============================================================================

#[cfg(test)]
pub(crate) mod fixtures {
    use tern_core::{
        CachedProduct, Money, NewLineItem, NewSale, PaymentMethod, ReceiptSnapshot, Timestamp,
    };

    use crate::pool::{Database, DbConfig};

    pub async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub fn at(raw: &str) -> Timestamp {
        Timestamp::parse(raw).unwrap()
    }

    pub fn now() -> Timestamp {
        at("2026-03-01T09:00:00Z")
    }

    pub fn product(id: &str, server_stock: i64) -> CachedProduct {
        CachedProduct {
            id: id.to_string(),
            sku: id.to_uppercase(),
            barcode: Some(format!("0000{}", id.len())),
            name: format!("Product {id}"),
            unit_price: Money::from_cents(100),
            inventory_id: format!("inv-{id}"),
            server_stock,
            reserved_stock: 0,
            cached_at: now(),
            store_id: "store-1".to_string(),
            terminal_id: None,
        }
    }

    pub fn line(product_id: &str, quantity: i64) -> NewLineItem {
        NewLineItem {
            product_id: product_id.to_string(),
            inventory_id: format!("inv-{product_id}"),
            sku: product_id.to_uppercase(),
            product_name: format!("Product {product_id}"),
            unit_price: Money::from_cents(100),
            quantity,
            discount: Money::zero(),
        }
    }

    pub fn sale(items: Vec<NewLineItem>) -> NewSale {
        NewSale {
            terminal_id: "T-01".to_string(),
            store_id: "store-1".to_string(),
            cashier_id: "cashier-1".to_string(),
            session_id: Some("session-1".to_string()),
            customer_id: None,
            items,
            tax: Money::zero(),
            payment_method: PaymentMethod::Cash,
            notes: None,
            snapshot: ReceiptSnapshot {
                store_name: "Corner Store".to_string(),
                cashier_name: "Dana".to_string(),
                terminal_name: "Front 1".to_string(),
                ..ReceiptSnapshot::default()
            },
        }
    }
}
