//! # tern-core: Pure Reconciliation Logic for Tern POS
//!
//! Domain types and deterministic rules for selling offline and settling
//! with the ledger server afterwards. Zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tern POS Terminal                                │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Checkout UI (external)                       │   │
//! │  │    local_stock ──► record_sale ──► materialize receipt          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tern-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  conflict │  │  receipt  │  │ validation│  │   │
//! │  │   │  Pending  │  │  resolve  │  │ ReceiptV. │  │  NewSale  │  │   │
//! │  │   │  Tx, ...  │  │  policy   │  │  render   │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │     tern-db (durable store)  ◄──  tern-sync (orchestrator)      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entities (CachedProduct, PendingTransaction, ...)
//! - [`money`] - Integer money
//! - [`time`] - Normalized UTC timestamps
//! - [`conflict`] - Conflict resolution engine and auto-accept policy
//! - [`receipt`] - Receipt materializer
//! - [`validation`] - Checkout input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use tern_core::conflict::{resolve, ConflictPolicy, StockSnapshot};
//! use tern_core::{LineItem, Money, Timestamp};
//!
//! let items = vec![LineItem {
//!     product_id: "cola".into(),
//!     inventory_id: "inv-cola".into(),
//!     sku: "COLA".into(),
//!     product_name: "Cola".into(),
//!     unit_price: Money::from_cents(100),
//!     requested_quantity: 8,
//!     fulfilled_quantity: None,
//!     discount: Money::zero(),
//! }];
//! let stock: StockSnapshot = [("cola", 5)].into_iter().collect();
//!
//! let conflict = resolve(&items, &stock, Timestamp::from_millis(0).unwrap())
//!     .conflict
//!     .unwrap();
//! assert!(ConflictPolicy::default().is_auto_acceptable(&conflict));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conflict;
pub mod error;
pub mod money;
pub mod receipt;
pub mod time;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use conflict::{ConflictPolicy, StockSnapshot};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use receipt::{materialize, render_text, ReceiptView};
pub use time::Timestamp;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Attempts after which a failed transaction stops being retried and needs
/// an operator.
pub const MAX_SYNC_ATTEMPTS: i64 = 5;

/// Transactions per submission request.
pub const SYNC_BATCH_SIZE: usize = 10;

/// Refunds strictly below this amount (minor units) may settle without a
/// supervisor.
pub const DEFAULT_AUTO_ACCEPT_REFUND_BELOW_CENTS: i64 = 500;

/// Highest unit price (minor units) a checkout line may carry.
pub const MAX_UNIT_PRICE_CENTS: i64 = 100_000_000;

/// Highest tax (minor units) a sale may carry.
pub const MAX_SALE_TAX_CENTS: i64 = 10_000_000_000;

/// Maximum lines in a single sale.
pub const MAX_SALE_LINES: usize = 100;

/// Maximum quantity on a single line.
///
/// ## Business Reason
/// Catches typos such as 1000 instead of 10 before stock is reserved.
pub const MAX_ITEM_QUANTITY: i64 = 999;
