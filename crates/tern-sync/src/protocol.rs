//! # Sync Protocol Messages
//!
//! JSON documents exchanged with the ledger server.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Sync Protocol Messages                             │
//! │                                                                         │
//! │  SALE SUBMISSION                                                       │
//! │  ───────────────                                                       │
//! │  TERMINAL ───► POST /api/sync/transactions                             │
//! │                SubmitBatchRequest { terminalId, storeId,               │
//! │                                     transactions: [...] }              │
//! │  SERVER   ◄─── SubmitBatchResponse { results: [TransactionOutcome] }   │
//! │                                                                         │
//! │                outcome.status:                                         │
//! │                  success  → saleId, saleNumber                         │
//! │                  conflict → saleId, saleNumber, conflict               │
//! │                  failed   → error                                      │
//! │                                                                         │
//! │  CATALOG REFRESH                                                       │
//! │  ───────────────                                                       │
//! │  TERMINAL ───► GET /api/sync/catalog?storeId=..&since=..               │
//! │  SERVER   ◄─── CatalogResponse { products: [...], serverTime? }        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! camelCase JSON; money as integer minor units; timestamps as RFC 3339.

use serde::{Deserialize, Serialize};

use tern_core::{
    CachedProduct, ConflictLine, ConflictResolution, ConflictType, LineItem, Money, PaymentMethod,
    PendingTransaction, Timestamp,
};

/// Path of the sale submission endpoint.
pub const SUBMIT_PATH: &str = "/api/sync/transactions";

/// Path of the catalog endpoint.
pub const CATALOG_PATH: &str = "/api/sync/catalog";

// =============================================================================
// Sale Submission
// =============================================================================

/// One request carrying a batch of offline sales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchRequest {
    pub terminal_id: String,
    pub store_id: String,
    pub transactions: Vec<TransactionPayload>,
}

impl SubmitBatchRequest {
    /// Builds a request for a batch; the header identity comes from the
    /// first member, since a terminal only records its own sales.
    pub fn from_batch(batch: &[PendingTransaction]) -> Self {
        let (terminal_id, store_id) = batch
            .first()
            .map(|tx| (tx.terminal_id.clone(), tx.store_id.clone()))
            .unwrap_or_default();

        SubmitBatchRequest {
            terminal_id,
            store_id,
            transactions: batch.iter().map(TransactionPayload::from).collect(),
        }
    }
}

/// A recorded sale as the server receives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    pub id: String,
    pub local_receipt_number: String,
    pub terminal_id: String,
    pub store_id: String,
    pub cashier_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub items: Vec<LinePayload>,
    pub subtotal: Money,
    pub tax: Money,
    pub discount: Money,
    pub total: Money,
    pub payment_method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinePayload {
    pub product_id: String,
    pub inventory_id: String,
    pub sku: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub discount: Money,
}

impl From<&LineItem> for LinePayload {
    fn from(item: &LineItem) -> Self {
        LinePayload {
            product_id: item.product_id.clone(),
            inventory_id: item.inventory_id.clone(),
            sku: item.sku.clone(),
            product_name: item.product_name.clone(),
            quantity: item.requested_quantity,
            unit_price: item.unit_price,
            discount: item.discount,
        }
    }
}

impl From<&PendingTransaction> for TransactionPayload {
    fn from(tx: &PendingTransaction) -> Self {
        TransactionPayload {
            id: tx.id.clone(),
            local_receipt_number: tx.local_receipt_number.clone(),
            terminal_id: tx.terminal_id.clone(),
            store_id: tx.store_id.clone(),
            cashier_id: tx.cashier_id.clone(),
            session_id: tx.session_id.clone(),
            customer_id: tx.customer_id.clone(),
            items: tx.items.iter().map(LinePayload::from).collect(),
            subtotal: tx.totals.subtotal,
            tax: tx.totals.tax,
            discount: tx.totals.discount,
            total: tx.totals.total,
            payment_method: tx.payment_method,
            notes: tx.notes.clone(),
            created_at: tx.created_at,
        }
    }
}

/// The server's answer to a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchResponse {
    pub results: Vec<TransactionOutcome>,
}

/// The server's verdict on one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutcome {
    pub transaction_id: String,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub sale_id: Option<String>,
    #[serde(default)]
    pub sale_number: Option<String>,
    #[serde(default)]
    pub conflict: Option<ConflictPayload>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Conflict,
    Failed,
}

/// Conflict as reported by the server.
///
/// Acknowledgment fields are local decisions and are not read from the
/// wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictPayload {
    pub conflict_type: ConflictType,
    pub items: Vec<ConflictLine>,
    pub original_total: Money,
    pub adjusted_total: Money,
    pub refund_amount: Money,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub resolved_at: Option<Timestamp>,
}

impl ConflictPayload {
    /// Converts to the stored resolution; `received_at` stands in for a
    /// missing server resolution time.
    pub fn into_resolution(self, received_at: Timestamp) -> ConflictResolution {
        ConflictResolution {
            conflict_type: self.conflict_type,
            items: self.items,
            original_total: self.original_total,
            adjusted_total: self.adjusted_total,
            refund_amount: self.refund_amount,
            message: self.message,
            auto_accepted: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: self.resolved_at.unwrap_or(received_at),
        }
    }
}

impl From<&ConflictResolution> for ConflictPayload {
    fn from(resolution: &ConflictResolution) -> Self {
        ConflictPayload {
            conflict_type: resolution.conflict_type,
            items: resolution.items.clone(),
            original_total: resolution.original_total,
            adjusted_total: resolution.adjusted_total,
            refund_amount: resolution.refund_amount,
            message: resolution.message.clone(),
            resolved_at: Some(resolution.resolved_at),
        }
    }
}

// =============================================================================
// Catalog Refresh
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse {
    pub products: Vec<CatalogProduct>,
    /// Server clock at the time of the answer; preferred watermark.
    #[serde(default)]
    pub server_time: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogProduct {
    pub id: String,
    pub sku: String,
    #[serde(default)]
    pub barcode: Option<String>,
    pub name: String,
    pub unit_price: Money,
    pub inventory_id: String,
    /// Server truth for the inventory line.
    pub stock: i64,
    pub store_id: String,
}

impl CatalogProduct {
    /// Cache entry for this product. `reserved_stock` is owned locally and
    /// is never overwritten by a catalog refresh.
    pub fn into_cached(self, terminal_id: Option<&str>, cached_at: Timestamp) -> CachedProduct {
        CachedProduct {
            id: self.id,
            sku: self.sku,
            barcode: self.barcode,
            name: self.name,
            unit_price: self.unit_price,
            inventory_id: self.inventory_id,
            server_stock: self.stock,
            reserved_stock: 0,
            cached_at,
            store_id: self.store_id,
            terminal_id: terminal_id.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_with_conflict_parses() {
        let json = r#"{
            "results": [
                { "transactionId": "a", "status": "success", "saleId": "s-1", "saleNumber": "S-0001" },
                { "transactionId": "b", "status": "conflict", "saleId": "s-2", "saleNumber": "S-0002",
                  "conflict": {
                    "conflictType": "stock_shortage",
                    "items": [{ "productId": "cola", "productName": "Cola", "requestedQuantity": 8,
                                "fulfilledQuantity": 5, "serverStock": 5, "unitPrice": 100, "refund": 300 }],
                    "originalTotal": 800, "adjustedTotal": 500, "refundAmount": 300,
                    "message": "Cola: 5/8"
                  } },
                { "transactionId": "c", "status": "failed", "error": "store closed" }
            ]
        }"#;

        let response: SubmitBatchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.results.len(), 3);
        assert_eq!(response.results[0].status, OutcomeStatus::Success);
        assert_eq!(response.results[2].error.as_deref(), Some("store closed"));

        let received = Timestamp::from_millis(1_000).unwrap();
        let conflict = response.results[1].conflict.clone().unwrap().into_resolution(received);
        assert_eq!(conflict.conflict_type, ConflictType::StockShortage);
        assert_eq!(conflict.refund_amount, Money::from_cents(300));
        assert_eq!(conflict.resolved_at, received);
        assert!(!conflict.is_acknowledged());
    }

    #[test]
    fn test_unknown_status_rejected() {
        let json = r#"{ "results": [{ "transactionId": "a", "status": "maybe" }] }"#;
        assert!(serde_json::from_str::<SubmitBatchResponse>(json).is_err());
    }

    #[test]
    fn test_catalog_product_keeps_reservations_local() {
        let json = r#"{
            "products": [{ "id": "cola", "sku": "COLA-1", "name": "Cola", "unitPrice": 150,
                           "inventoryId": "inv-cola", "stock": 12, "storeId": "store-1" }],
            "serverTime": "2026-03-01T10:00:00.000Z"
        }"#;

        let response: CatalogResponse = serde_json::from_str(json).unwrap();
        assert!(response.server_time.is_some());

        let at = Timestamp::from_millis(0).unwrap();
        let cached = response.products[0].clone().into_cached(Some("t-01"), at);
        assert_eq!(cached.server_stock, 12);
        assert_eq!(cached.reserved_stock, 0);
        assert_eq!(cached.terminal_id.as_deref(), Some("t-01"));
    }
}
