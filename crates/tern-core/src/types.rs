//! # Domain Types
//!
//! Entities the offline terminal persists, syncs and prints.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────────┐  ┌─────────────────┐   │
//! │  │  CachedProduct  │   │  PendingTransaction  │  │ Inventory       │   │
//! │  │  ─────────────  │   │  ──────────────────  │  │ Reservation     │   │
//! │  │  server_stock   │◄──│  items: [LineItem]   │──►│  ─────────────  │   │
//! │  │  reserved_stock │   │  status              │  │  (tx, product)  │   │
//! │  │  local_stock()  │   │  conflict?           │  │  quantity       │   │
//! │  └─────────────────┘   │  snapshot            │  └─────────────────┘   │
//! │                        └──────────┬───────────┘                         │
//! │                                   │ enqueued with                       │
//! │                        ┌──────────▼───────────┐                         │
//! │                        │    SyncQueueItem     │                         │
//! │                        │  (outbox entry)      │                         │
//! │                        └──────────────────────┘                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transaction Lifecycle
//! ```text
//!   pending ──► syncing ──┬──► synced     (terminal, reservations released)
//!      ▲                  ├──► conflict   (terminal, reservations released)
//!      │                  └──► failed ──► retried while attempts < cap
//!      └── request-level failure / crash recovery
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::money::Money;
use crate::time::Timestamp;

/// Generates a new entity identifier (UUID v4).
///
/// Offline terminals cannot coordinate, so ids must be globally unique
/// without a server round trip.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Cached Product
// =============================================================================

/// A catalog product as last seen from the server, plus local reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CachedProduct {
    pub id: String,
    pub sku: String,
    pub barcode: Option<String>,
    pub name: String,
    #[ts(as = "i64")]
    pub unit_price: Money,
    /// Inventory-line identifier on the server.
    pub inventory_id: String,
    /// Last known server truth.
    pub server_stock: i64,
    /// Sum of active local reservations.
    pub reserved_stock: i64,
    #[ts(as = "String")]
    pub cached_at: Timestamp,
    pub store_id: String,
    pub terminal_id: Option<String>,
}

impl CachedProduct {
    /// Raw availability: may be negative if the server count dropped under
    /// what this terminal already sold.
    #[inline]
    pub fn local_stock(&self) -> i64 {
        self.server_stock - self.reserved_stock
    }

    /// Availability for display, floored at zero.
    #[inline]
    pub fn display_stock(&self) -> i64 {
        self.local_stock().max(0)
    }
}

// =============================================================================
// Transaction Status
// =============================================================================

/// Sync state of a locally recorded sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Recorded locally, waiting for a sync cycle.
    Pending,
    /// Part of a batch currently in flight.
    Syncing,
    /// Accepted by the server as recorded.
    Synced,
    /// Accepted by the server with reduced fulfillment.
    Conflict,
    /// Rejected by the server for this transaction only.
    Failed,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 5] = [
        TransactionStatus::Pending,
        TransactionStatus::Syncing,
        TransactionStatus::Synced,
        TransactionStatus::Conflict,
        TransactionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Syncing => "syncing",
            TransactionStatus::Synced => "synced",
            TransactionStatus::Conflict => "conflict",
            TransactionStatus::Failed => "failed",
        }
    }

    /// Whether the server has issued a final verdict.
    pub fn is_finalized(&self) -> bool {
        matches!(self, TransactionStatus::Synced | TransactionStatus::Conflict)
    }

    /// Reservations exist exactly while the transaction is not finalized.
    pub fn holds_reservations(&self) -> bool {
        !self.is_finalized()
    }

    /// Human label printed on receipts.
    pub fn receipt_label(&self) -> &'static str {
        match self {
            TransactionStatus::Pending | TransactionStatus::Syncing => "PENDING SYNC",
            TransactionStatus::Synced => "COMPLETED",
            TransactionStatus::Conflict => "ADJUSTED",
            TransactionStatus::Failed => "SYNC FAILED",
        }
    }
}

impl Default for TransactionStatus {
    fn default() -> Self {
        TransactionStatus::Pending
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: TransactionStatus::ALL
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
            })
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash payment.
    Cash,
    /// Card payment on external terminal.
    Card,
    /// Wallet or QR payment.
    Mobile,
    /// Split across several tenders.
    Mixed,
}

impl PaymentMethod {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::Card => "Card",
            PaymentMethod::Mobile => "Mobile",
            PaymentMethod::Mixed => "Mixed",
        }
    }
}

// =============================================================================
// Line Items & Totals
// =============================================================================

/// One line of a recorded sale.
///
/// Product data is frozen at time of sale, so the receipt and the sync
/// payload never need a catalog lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineItem {
    pub product_id: String,
    pub inventory_id: String,
    pub sku: String,
    pub product_name: String,
    #[ts(as = "i64")]
    pub unit_price: Money,
    pub requested_quantity: i64,
    /// Set once the server has ruled on the transaction.
    pub fulfilled_quantity: Option<i64>,
    #[ts(as = "i64")]
    pub discount: Money,
}

impl LineItem {
    /// `unit_price × requested_quantity`.
    #[inline]
    pub fn gross(&self) -> Money {
        self.unit_price.multiply_quantity(self.requested_quantity)
    }

    /// Gross minus the line discount.
    #[inline]
    pub fn net(&self) -> Money {
        self.gross() - self.discount
    }

    /// The quantity the customer actually takes home, as far as we know.
    #[inline]
    pub fn effective_quantity(&self) -> i64 {
        self.fulfilled_quantity.unwrap_or(self.requested_quantity)
    }
}

/// Totals computed at checkout. `total = subtotal − discount + tax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransactionTotals {
    #[ts(as = "i64")]
    pub subtotal: Money,
    #[ts(as = "i64")]
    pub tax: Money,
    #[ts(as = "i64")]
    pub discount: Money,
    #[ts(as = "i64")]
    pub total: Money,
}

impl TransactionTotals {
    /// Sums the lines. Tax is supplied by the caller; the core does not
    /// compute it.
    pub fn compute(items: &[LineItem], tax: Money) -> Self {
        let subtotal: Money = items.iter().map(LineItem::gross).sum();
        let discount: Money = items.iter().map(|item| item.discount).sum();
        TransactionTotals {
            subtotal,
            tax,
            discount,
            total: subtotal - discount + tax,
        }
    }
}

// =============================================================================
// Receipt Snapshot
// =============================================================================

/// Display data captured at checkout so a receipt renders with no lookups.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReceiptSnapshot {
    pub store_name: String,
    pub store_address: Option<String>,
    pub store_phone: Option<String>,
    pub store_tax_id: Option<String>,
    pub cashier_name: String,
    pub terminal_name: String,
}

// =============================================================================
// Conflict Resolution
// =============================================================================

/// Classification of a conflict. Shared with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// At least one affected line was partially fulfilled.
    StockShortage,
    /// Every affected line had nothing left to give.
    ProductUnavailable,
}

/// An affected line in a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ConflictLine {
    pub product_id: String,
    pub product_name: String,
    pub requested_quantity: i64,
    pub fulfilled_quantity: i64,
    pub server_stock: i64,
    #[ts(as = "i64")]
    pub unit_price: Money,
    #[ts(as = "i64")]
    pub refund: Money,
}

/// The server's (or the local engine's) verdict on an oversold transaction.
///
/// Serialized in camelCase because the same document arrives from the
/// server inside a sync response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub conflict_type: ConflictType,
    pub items: Vec<ConflictLine>,
    #[ts(as = "i64")]
    pub original_total: Money,
    #[ts(as = "i64")]
    pub adjusted_total: Money,
    #[ts(as = "i64")]
    pub refund_amount: Money,
    pub message: String,
    #[serde(default)]
    pub auto_accepted: bool,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub acknowledged_at: Option<Timestamp>,
    #[ts(as = "String")]
    pub resolved_at: Timestamp,
}

impl ConflictResolution {
    /// Who signs off on conflicts the policy accepted without a supervisor.
    pub const SYSTEM_ACKNOWLEDGER: &'static str = "system:auto";

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_by.is_some()
    }
}

// =============================================================================
// Pending Transaction
// =============================================================================

/// A sale recorded on this terminal, in any sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PendingTransaction {
    pub id: String,
    pub local_receipt_number: String,
    pub terminal_id: String,
    pub store_id: String,
    pub cashier_id: String,
    pub session_id: Option<String>,
    pub customer_id: Option<String>,
    pub items: Vec<LineItem>,
    pub totals: TransactionTotals,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: Timestamp,
    pub status: TransactionStatus,
    pub attempts: i64,
    #[ts(as = "Option<String>")]
    pub last_attempt_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub server_sale_id: Option<String>,
    pub server_sale_number: Option<String>,
    pub conflict: Option<ConflictResolution>,
    #[ts(as = "Option<String>")]
    pub synced_at: Option<Timestamp>,
    pub snapshot: ReceiptSnapshot,
}

impl PendingTransaction {
    /// True once a conflict was acknowledged by a supervisor or the policy.
    pub fn conflict_acknowledged(&self) -> bool {
        self.conflict
            .as_ref()
            .map(ConflictResolution::is_acknowledged)
            .unwrap_or(false)
    }

    /// Whether an operator must look at this transaction.
    pub fn needs_attention(&self, max_attempts: i64) -> bool {
        match self.status {
            TransactionStatus::Failed => self.attempts >= max_attempts,
            TransactionStatus::Conflict => !self.conflict_acknowledged(),
            _ => false,
        }
    }

    /// Quantity per product to hold while this transaction is unresolved.
    /// Lines for the same product are summed.
    pub fn reservation_quantities(&self) -> BTreeMap<String, i64> {
        let mut quantities = BTreeMap::new();
        for item in &self.items {
            *quantities.entry(item.product_id.clone()).or_insert(0) += item.requested_quantity;
        }
        quantities
    }

    /// Writes fulfilled quantities into the lines.
    ///
    /// Stock is allocated to lines in order, so when a product appears on
    /// several lines the affected ones are always its last lines. Lines not
    /// named by the resolution were fully honored.
    pub fn apply_fulfillment(&mut self, conflict: Option<&ConflictResolution>) {
        let mut lines_left: BTreeMap<String, usize> = BTreeMap::new();
        for item in &self.items {
            *lines_left.entry(item.product_id.clone()).or_insert(0) += 1;
        }

        let mut shortfalls: BTreeMap<String, VecDeque<i64>> = BTreeMap::new();
        for line in conflict.map(|c| c.items.as_slice()).unwrap_or_default() {
            shortfalls
                .entry(line.product_id.clone())
                .or_default()
                .push_back(line.fulfilled_quantity);
        }

        for item in &mut self.items {
            let left = lines_left.get_mut(&item.product_id).map(|n| {
                let current = *n;
                *n -= 1;
                current
            });
            let fulfilled = match (shortfalls.get_mut(&item.product_id), left) {
                (Some(queue), Some(left)) if queue.len() >= left => queue.pop_front(),
                _ => None,
            };
            item.fulfilled_quantity = Some(fulfilled.unwrap_or(item.requested_quantity));
        }
    }
}

// =============================================================================
// Checkout Input
// =============================================================================

/// A line as entered at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewLineItem {
    pub product_id: String,
    pub inventory_id: String,
    pub sku: String,
    pub product_name: String,
    #[ts(as = "i64")]
    pub unit_price: Money,
    pub quantity: i64,
    #[serde(default)]
    #[ts(as = "i64")]
    pub discount: Money,
}

impl From<NewLineItem> for LineItem {
    fn from(item: NewLineItem) -> Self {
        LineItem {
            product_id: item.product_id,
            inventory_id: item.inventory_id,
            sku: item.sku,
            product_name: item.product_name,
            unit_price: item.unit_price,
            requested_quantity: item.quantity,
            fulfilled_quantity: None,
            discount: item.discount,
        }
    }
}

/// Everything the checkout UI hands over to record a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewSale {
    pub terminal_id: String,
    pub store_id: String,
    pub cashier_id: String,
    pub session_id: Option<String>,
    pub customer_id: Option<String>,
    pub items: Vec<NewLineItem>,
    #[serde(default)]
    #[ts(as = "i64")]
    pub tax: Money,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub snapshot: ReceiptSnapshot,
}

impl NewSale {
    /// Builds the `pending` transaction this sale becomes.
    pub fn into_transaction(
        self,
        id: String,
        local_receipt_number: String,
        created_at: Timestamp,
    ) -> PendingTransaction {
        let items: Vec<LineItem> = self.items.into_iter().map(LineItem::from).collect();
        let totals = TransactionTotals::compute(&items, self.tax);

        PendingTransaction {
            id,
            local_receipt_number,
            terminal_id: self.terminal_id,
            store_id: self.store_id,
            cashier_id: self.cashier_id,
            session_id: self.session_id,
            customer_id: self.customer_id,
            items,
            totals,
            payment_method: self.payment_method,
            notes: self.notes,
            created_at,
            status: TransactionStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
            server_sale_id: None,
            server_sale_number: None,
            conflict: None,
            synced_at: None,
            snapshot: self.snapshot,
        }
    }
}

// =============================================================================
// Inventory Reservation
// =============================================================================

/// Stock held locally for an unresolved transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InventoryReservation {
    pub transaction_id: String,
    pub product_id: String,
    pub quantity: i64,
    #[ts(as = "String")]
    pub created_at: Timestamp,
}

// =============================================================================
// Sync Queue (Outbox)
// =============================================================================

/// Kind of entity an outbox entry refers to.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncItemType {
    Transaction,
    InventoryAdjustment,
    CustomerUpsert,
}

/// Delivery state of an outbox entry.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncQueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// An entry in the outbound sync queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncQueueItem {
    pub id: String,
    pub item_type: SyncItemType,
    /// Id of the entity being synced.
    pub reference_id: String,
    /// Lower runs first.
    pub priority: i64,
    /// Optional JSON document for entity types that carry one.
    pub payload: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub status: SyncQueueStatus,
    #[ts(as = "String")]
    pub created_at: Timestamp,
    #[ts(as = "Option<String>")]
    pub last_attempt_at: Option<Timestamp>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<Timestamp>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: &str, price: i64, qty: i64, discount: i64) -> NewLineItem {
        NewLineItem {
            product_id: product_id.to_string(),
            inventory_id: format!("inv-{product_id}"),
            sku: product_id.to_uppercase(),
            product_name: format!("Product {product_id}"),
            unit_price: Money::from_cents(price),
            quantity: qty,
            discount: Money::from_cents(discount),
        }
    }

    fn sale(items: Vec<NewLineItem>) -> NewSale {
        NewSale {
            terminal_id: "T-01".to_string(),
            store_id: "store-1".to_string(),
            cashier_id: "cashier-1".to_string(),
            session_id: None,
            customer_id: None,
            items,
            tax: Money::from_cents(80),
            payment_method: PaymentMethod::Cash,
            notes: None,
            snapshot: ReceiptSnapshot::default(),
        }
    }

    #[test]
    fn test_local_stock_may_go_negative_but_display_floors() {
        let product = CachedProduct {
            id: "p1".to_string(),
            sku: "P1".to_string(),
            barcode: None,
            name: "Water".to_string(),
            unit_price: Money::from_cents(100),
            inventory_id: "inv-p1".to_string(),
            server_stock: 2,
            reserved_stock: 5,
            cached_at: Timestamp::from_millis(0).unwrap(),
            store_id: "store-1".to_string(),
            terminal_id: None,
        };
        assert_eq!(product.local_stock(), -3);
        assert_eq!(product.display_stock(), 0);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in TransactionStatus::ALL {
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
        assert!("done".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_reservations_held_until_finalized() {
        assert!(TransactionStatus::Pending.holds_reservations());
        assert!(TransactionStatus::Syncing.holds_reservations());
        assert!(TransactionStatus::Failed.holds_reservations());
        assert!(!TransactionStatus::Synced.holds_reservations());
        assert!(!TransactionStatus::Conflict.holds_reservations());
    }

    #[test]
    fn test_into_transaction_computes_totals() {
        let tx = sale(vec![line("a", 250, 2, 50), line("b", 100, 3, 0)]).into_transaction(
            "tx-1".to_string(),
            "R-1".to_string(),
            Timestamp::from_millis(0).unwrap(),
        );

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.totals.subtotal.cents(), 800);
        assert_eq!(tx.totals.discount.cents(), 50);
        assert_eq!(tx.totals.tax.cents(), 80);
        assert_eq!(tx.totals.total.cents(), 830);
        assert!(tx.items.iter().all(|item| item.fulfilled_quantity.is_none()));
    }

    #[test]
    fn test_reservation_quantities_sum_same_product() {
        let tx = sale(vec![line("a", 100, 2, 0), line("b", 100, 1, 0), line("a", 100, 3, 0)])
            .into_transaction(
                "tx-1".to_string(),
                "R-1".to_string(),
                Timestamp::from_millis(0).unwrap(),
            );

        let quantities = tx.reservation_quantities();
        assert_eq!(quantities.len(), 2);
        assert_eq!(quantities["a"], 5);
        assert_eq!(quantities["b"], 1);
    }

    #[test]
    fn test_apply_fulfillment_defaults_unaffected_lines_to_requested() {
        let mut tx = sale(vec![line("a", 100, 8, 0), line("b", 100, 1, 0)]).into_transaction(
            "tx-1".to_string(),
            "R-1".to_string(),
            Timestamp::from_millis(0).unwrap(),
        );
        let conflict = ConflictResolution {
            conflict_type: ConflictType::StockShortage,
            items: vec![ConflictLine {
                product_id: "a".to_string(),
                product_name: "Product a".to_string(),
                requested_quantity: 8,
                fulfilled_quantity: 5,
                server_stock: 5,
                unit_price: Money::from_cents(100),
                refund: Money::from_cents(300),
            }],
            original_total: Money::from_cents(900),
            adjusted_total: Money::from_cents(600),
            refund_amount: Money::from_cents(300),
            message: String::new(),
            auto_accepted: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: Timestamp::from_millis(0).unwrap(),
        };

        tx.apply_fulfillment(Some(&conflict));

        assert_eq!(tx.items[0].fulfilled_quantity, Some(5));
        assert_eq!(tx.items[1].fulfilled_quantity, Some(1));
    }

    #[test]
    fn test_conflict_resolution_uses_camel_case_on_the_wire() {
        let json = r#"{
            "conflictType": "product_unavailable",
            "items": [],
            "originalTotal": 200,
            "adjustedTotal": 0,
            "refundAmount": 200,
            "message": "Out of stock",
            "resolvedAt": "2026-03-01T09:15:00Z"
        }"#;
        let resolution: ConflictResolution = serde_json::from_str(json).unwrap();
        assert_eq!(resolution.conflict_type, ConflictType::ProductUnavailable);
        assert_eq!(resolution.refund_amount.cents(), 200);
        assert!(!resolution.auto_accepted);
        assert!(!resolution.is_acknowledged());
    }

    #[test]
    fn test_apply_fulfillment_shortfall_lands_on_last_lines_of_product() {
        let mut tx = sale(vec![line("a", 100, 2, 0), line("a", 100, 3, 0)]).into_transaction(
            "tx-1".to_string(),
            "R-1".to_string(),
            Timestamp::from_millis(0).unwrap(),
        );
        let conflict = ConflictResolution {
            conflict_type: ConflictType::StockShortage,
            items: vec![ConflictLine {
                product_id: "a".to_string(),
                product_name: "Product a".to_string(),
                requested_quantity: 3,
                fulfilled_quantity: 1,
                server_stock: 3,
                unit_price: Money::from_cents(100),
                refund: Money::from_cents(200),
            }],
            original_total: Money::from_cents(500),
            adjusted_total: Money::from_cents(300),
            refund_amount: Money::from_cents(200),
            message: String::new(),
            auto_accepted: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: Timestamp::from_millis(0).unwrap(),
        };

        tx.apply_fulfillment(Some(&conflict));

        assert_eq!(tx.items[0].fulfilled_quantity, Some(2));
        assert_eq!(tx.items[1].fulfilled_quantity, Some(1));
    }
}
