//! # Conflict Resolution Engine
//!
//! Decides how much of an offline sale the server's stock can honor.
//!
//! ## Per-Line Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  stock = max(snapshot[product], 0)     (missing product → 0)            │
//! │                                                                         │
//! │  stock ≥ requested      fulfilled = requested    refund = 0             │
//! │                         adjusted  = price×req − discount                │
//! │                                                                         │
//! │  0 < stock < requested  fulfilled = stock        refund = (req−stock)×p │
//! │                         adjusted  = price×req − discount − refund       │
//! │                                                                         │
//! │  stock == 0             fulfilled = 0            refund = price×req − d │
//! │                         adjusted  = 0                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lines naming the same product draw from one pool of stock, first line
//! first.
//!
//! ## Classification
//! - no flagged line → no conflict
//! - every flagged line fulfilled 0 → `product_unavailable`
//! - otherwise → `stock_shortage`
//!
//! The function is pure. The server runs the same algorithm, so both sides
//! arrive at identical verdicts from identical inputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::money::Money;
use crate::time::Timestamp;
use crate::types::{ConflictLine, ConflictResolution, ConflictType, LineItem};
use crate::DEFAULT_AUTO_ACCEPT_REFUND_BELOW_CENTS;

// =============================================================================
// Stock Snapshot
// =============================================================================

/// Server-truth stock per product id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot(BTreeMap<String, i64>);

impl StockSnapshot {
    pub fn new() -> Self {
        StockSnapshot::default()
    }

    pub fn set(&mut self, product_id: impl Into<String>, stock: i64) {
        self.0.insert(product_id.into(), stock);
    }

    /// Usable stock: missing products have none, negative counts clamp to 0.
    pub fn available(&self, product_id: &str) -> i64 {
        self.0.get(product_id).copied().unwrap_or(0).max(0)
    }

    /// The raw figure reported for a product, if any.
    pub fn reported(&self, product_id: &str) -> Option<i64> {
        self.0.get(product_id).copied()
    }
}

impl<K: Into<String>> FromIterator<(K, i64)> for StockSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, i64)>>(iter: I) -> Self {
        StockSnapshot(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// How one line came out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFulfillment {
    pub product_id: String,
    pub requested: i64,
    pub fulfilled: i64,
    pub refund: Money,
    /// Contribution of this line to the adjusted total.
    pub adjusted: Money,
}

impl LineFulfillment {
    #[inline]
    pub fn is_flagged(&self) -> bool {
        self.fulfilled < self.requested
    }
}

/// Output of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// One entry per input line, in input order.
    pub lines: Vec<LineFulfillment>,
    pub original_total: Money,
    pub adjusted_total: Money,
    pub refund_amount: Money,
    /// Present iff at least one line was flagged.
    pub conflict: Option<ConflictResolution>,
}

impl Resolution {
    pub fn has_conflict(&self) -> bool {
        self.conflict.is_some()
    }
}

/// Resolves a transaction's lines against server stock.
///
/// ```rust
/// use tern_core::conflict::{resolve, StockSnapshot};
/// use tern_core::money::Money;
/// use tern_core::time::Timestamp;
/// use tern_core::types::{ConflictType, LineItem};
///
/// let items = vec![LineItem {
///     product_id: "cola".into(),
///     inventory_id: "inv-cola".into(),
///     sku: "COLA".into(),
///     product_name: "Cola".into(),
///     unit_price: Money::from_cents(100),
///     requested_quantity: 8,
///     fulfilled_quantity: None,
///     discount: Money::zero(),
/// }];
/// let stock: StockSnapshot = [("cola", 5)].into_iter().collect();
///
/// let resolution = resolve(&items, &stock, Timestamp::from_millis(0).unwrap());
/// let conflict = resolution.conflict.unwrap();
/// assert_eq!(conflict.conflict_type, ConflictType::StockShortage);
/// assert_eq!(conflict.refund_amount.cents(), 300);
/// ```
pub fn resolve(items: &[LineItem], server_stock: &StockSnapshot, resolved_at: Timestamp) -> Resolution {
    let mut remaining: BTreeMap<&str, i64> = BTreeMap::new();
    let mut lines = Vec::with_capacity(items.len());
    let mut affected = Vec::new();

    for item in items {
        let stock = remaining
            .entry(item.product_id.as_str())
            .or_insert_with(|| server_stock.available(&item.product_id));

        let requested = item.requested_quantity;
        let net = item.net();

        let (fulfilled, refund, adjusted) = if *stock >= requested {
            (requested, Money::zero(), net)
        } else if *stock > 0 {
            let refund = item.unit_price.multiply_quantity(requested - *stock);
            (*stock, refund, net - refund)
        } else {
            (0, net.non_negative(), Money::zero())
        };

        let pool_before = *stock;
        *stock -= fulfilled;

        let line = LineFulfillment {
            product_id: item.product_id.clone(),
            requested,
            fulfilled,
            refund,
            adjusted,
        };

        if line.is_flagged() {
            affected.push(ConflictLine {
                product_id: item.product_id.clone(),
                product_name: item.product_name.clone(),
                requested_quantity: requested,
                fulfilled_quantity: fulfilled,
                server_stock: pool_before,
                unit_price: item.unit_price,
                refund,
            });
        }

        lines.push(line);
    }

    let original_total: Money = items.iter().map(LineItem::net).sum();
    let adjusted_total: Money = lines.iter().map(|l| l.adjusted).sum();
    let refund_amount: Money = lines.iter().map(|l| l.refund).sum();

    let conflict = if affected.is_empty() {
        None
    } else {
        let conflict_type = if affected.iter().all(|l| l.fulfilled_quantity == 0) {
            ConflictType::ProductUnavailable
        } else {
            ConflictType::StockShortage
        };
        let message = conflict_message(conflict_type, &affected, refund_amount);

        Some(ConflictResolution {
            conflict_type,
            items: affected,
            original_total,
            adjusted_total,
            refund_amount,
            message,
            auto_accepted: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at,
        })
    };

    Resolution {
        lines,
        original_total,
        adjusted_total,
        refund_amount,
        conflict,
    }
}

/// `Stock shortage: Cola (5/8), Chips (out of stock). Refund due: $5.00`
fn conflict_message(conflict_type: ConflictType, lines: &[ConflictLine], refund: Money) -> String {
    let heading = match conflict_type {
        ConflictType::StockShortage => "Stock shortage",
        ConflictType::ProductUnavailable => "Product unavailable",
    };

    let products: Vec<String> = lines
        .iter()
        .map(|line| {
            if line.fulfilled_quantity == 0 {
                format!("{} (out of stock)", line.product_name)
            } else {
                format!(
                    "{} ({}/{})",
                    line.product_name, line.fulfilled_quantity, line.requested_quantity
                )
            }
        })
        .collect();

    format!("{}: {}. Refund due: {}", heading, products.join(", "), refund)
}

/// Checks the arithmetic identities of a resolution received from elsewhere.
///
/// `refund_amount == Σ line refunds`, `original − adjusted == refund_amount`
/// and `fulfilled ≤ requested` on every line.
pub fn is_consistent(resolution: &ConflictResolution) -> bool {
    let line_refunds: Money = resolution.items.iter().map(|l| l.refund).sum();

    line_refunds == resolution.refund_amount
        && resolution.original_total - resolution.adjusted_total == resolution.refund_amount
        && resolution
            .items
            .iter()
            .all(|l| l.fulfilled_quantity >= 0 && l.fulfilled_quantity <= l.requested_quantity)
}

// =============================================================================
// Auto-Accept Policy
// =============================================================================

/// Decides which conflicts settle without a supervisor.
///
/// The threshold is a flat amount in minor units. It is not currency-aware
/// and does not scale with the transaction size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPolicy {
    /// Refunds strictly below this amount may auto-accept.
    pub auto_accept_refund_below: Money,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy {
            auto_accept_refund_below: Money::from_cents(DEFAULT_AUTO_ACCEPT_REFUND_BELOW_CENTS),
        }
    }
}

impl ConflictPolicy {
    pub fn with_threshold(threshold: Money) -> Self {
        ConflictPolicy {
            auto_accept_refund_below: threshold,
        }
    }

    /// Small refund AND nothing was taken away entirely.
    pub fn is_auto_acceptable(&self, resolution: &ConflictResolution) -> bool {
        resolution.refund_amount < self.auto_accept_refund_below
            && resolution.items.iter().all(|l| l.fulfilled_quantity > 0)
    }

    /// Stamps the resolution as accepted by the system when the policy allows.
    ///
    /// Returns whether it was accepted. Already acknowledged resolutions are
    /// left alone.
    pub fn apply(&self, resolution: &mut ConflictResolution, at: Timestamp) -> bool {
        if resolution.is_acknowledged() || !self.is_auto_acceptable(resolution) {
            return false;
        }

        resolution.auto_accepted = true;
        resolution.acknowledged_by = Some(ConflictResolution::SYSTEM_ACKNOWLEDGER.to_string());
        resolution.acknowledged_at = Some(at);
        true
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> Timestamp {
        Timestamp::from_millis(1_772_356_500_000).unwrap()
    }

    fn item(product_id: &str, price: i64, requested: i64, discount: i64) -> LineItem {
        LineItem {
            product_id: product_id.to_string(),
            inventory_id: format!("inv-{product_id}"),
            sku: product_id.to_uppercase(),
            product_name: product_id.to_string(),
            unit_price: Money::from_cents(price),
            requested_quantity: requested,
            fulfilled_quantity: None,
            discount: Money::from_cents(discount),
        }
    }

    fn assert_invariants(resolution: &Resolution) {
        for line in &resolution.lines {
            assert!(line.fulfilled <= line.requested);
            assert!(line.fulfilled >= 0);
        }
        assert_eq!(
            resolution.refund_amount,
            resolution.lines.iter().map(|l| l.refund).sum::<Money>()
        );
        assert_eq!(
            resolution.original_total - resolution.adjusted_total,
            resolution.refund_amount
        );
        if let Some(conflict) = &resolution.conflict {
            assert!(is_consistent(conflict));
        }
    }

    #[test]
    fn test_sufficient_stock_has_no_conflict() {
        let items = vec![item("cola", 150, 3, 50)];
        let stock: StockSnapshot = [("cola", 3)].into_iter().collect();

        let resolution = resolve(&items, &stock, at());

        assert!(!resolution.has_conflict());
        assert_eq!(resolution.lines[0].fulfilled, 3);
        assert_eq!(resolution.adjusted_total.cents(), 400);
        assert_eq!(resolution.original_total.cents(), 400);
        assert_invariants(&resolution);
    }

    #[test]
    fn test_partial_stock_is_a_shortage() {
        let items = vec![item("cola", 100, 8, 0)];
        let stock: StockSnapshot = [("cola", 5)].into_iter().collect();

        let resolution = resolve(&items, &stock, at());
        let conflict = resolution.conflict.clone().unwrap();

        assert_eq!(conflict.conflict_type, ConflictType::StockShortage);
        assert_eq!(conflict.items.len(), 1);
        assert_eq!(conflict.items[0].fulfilled_quantity, 5);
        assert_eq!(conflict.items[0].server_stock, 5);
        assert_eq!(conflict.refund_amount.cents(), 300);
        assert_eq!(conflict.adjusted_total.cents(), 500);
        assert_eq!(conflict.message, "Stock shortage: cola (5/8). Refund due: $3.00");
        assert_invariants(&resolution);
    }

    #[test]
    fn test_zero_stock_only_line_is_unavailable() {
        let items = vec![item("chips", 250, 2, 100)];
        let stock: StockSnapshot = [("chips", 0)].into_iter().collect();

        let resolution = resolve(&items, &stock, at());
        let conflict = resolution.conflict.clone().unwrap();

        assert_eq!(conflict.conflict_type, ConflictType::ProductUnavailable);
        assert_eq!(conflict.items[0].fulfilled_quantity, 0);
        assert_eq!(conflict.refund_amount.cents(), 400);
        assert_eq!(conflict.adjusted_total, Money::zero());
        assert_eq!(
            conflict.message,
            "Product unavailable: chips (out of stock). Refund due: $4.00"
        );
        assert_invariants(&resolution);
    }

    #[test]
    fn test_mixed_lines_classify_as_shortage() {
        let items = vec![item("cola", 100, 4, 0), item("chips", 200, 2, 0)];
        let stock: StockSnapshot = [("cola", 1), ("chips", 0)].into_iter().collect();

        let resolution = resolve(&items, &stock, at());
        let conflict = resolution.conflict.clone().unwrap();

        assert_eq!(conflict.conflict_type, ConflictType::StockShortage);
        assert_eq!(conflict.items.len(), 2);
        assert_eq!(conflict.refund_amount.cents(), 300 + 400);
        assert!(conflict.message.contains("cola (1/4)"));
        assert!(conflict.message.contains("chips (out of stock)"));
        assert_invariants(&resolution);
    }

    #[test]
    fn test_missing_and_negative_stock_count_as_zero() {
        let items = vec![item("ghost", 100, 1, 0), item("oversold", 100, 1, 0)];
        let stock: StockSnapshot = [("oversold", -4)].into_iter().collect();

        let resolution = resolve(&items, &stock, at());
        let conflict = resolution.conflict.clone().unwrap();

        assert_eq!(conflict.conflict_type, ConflictType::ProductUnavailable);
        assert!(resolution.lines.iter().all(|l| l.fulfilled == 0));
        assert_invariants(&resolution);
    }

    #[test]
    fn test_repeated_product_draws_from_one_pool() {
        let items = vec![item("cola", 100, 2, 0), item("cola", 100, 3, 0)];
        let stock: StockSnapshot = [("cola", 3)].into_iter().collect();

        let resolution = resolve(&items, &stock, at());

        assert_eq!(resolution.lines[0].fulfilled, 2);
        assert_eq!(resolution.lines[1].fulfilled, 1);
        let conflict = resolution.conflict.clone().unwrap();
        assert_eq!(conflict.items.len(), 1);
        assert_eq!(conflict.items[0].server_stock, 1);
        assert_invariants(&resolution);
    }

    #[test]
    fn test_auto_accept_small_partial_refund() {
        let policy = ConflictPolicy::default();
        let items = vec![item("cola", 100, 8, 0)];
        let stock: StockSnapshot = [("cola", 5)].into_iter().collect();
        let mut conflict = resolve(&items, &stock, at()).conflict.unwrap();

        assert_eq!(conflict.refund_amount.cents(), 300);
        assert!(policy.is_auto_acceptable(&conflict));
        assert!(policy.apply(&mut conflict, at()));
        assert!(conflict.auto_accepted);
        assert_eq!(conflict.acknowledged_by.as_deref(), Some("system:auto"));
        assert_eq!(conflict.acknowledged_at, Some(at()));
    }

    #[test]
    fn test_zero_fulfilled_line_blocks_auto_accept() {
        let policy = ConflictPolicy::default();
        let items = vec![item("cola", 100, 1, 0), item("chips", 100, 2, 0)];
        let stock: StockSnapshot = [("cola", 1), ("chips", 0)].into_iter().collect();
        let mut conflict = resolve(&items, &stock, at()).conflict.unwrap();

        assert_eq!(conflict.refund_amount.cents(), 200);
        assert!(!policy.is_auto_acceptable(&conflict));
        assert!(!policy.apply(&mut conflict, at()));
        assert!(!conflict.auto_accepted);
        assert!(conflict.acknowledged_by.is_none());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let items = vec![item("cola", 500, 2, 0)];
        let stock: StockSnapshot = [("cola", 1)].into_iter().collect();
        let conflict = resolve(&items, &stock, at()).conflict.unwrap();

        assert_eq!(conflict.refund_amount.cents(), 500);
        assert!(!ConflictPolicy::default().is_auto_acceptable(&conflict));
        assert!(ConflictPolicy::with_threshold(Money::from_cents(501)).is_auto_acceptable(&conflict));
    }

    #[test]
    fn test_inconsistent_resolution_is_detected() {
        let items = vec![item("cola", 100, 8, 0)];
        let stock: StockSnapshot = [("cola", 5)].into_iter().collect();
        let mut conflict = resolve(&items, &stock, at()).conflict.unwrap();
        assert!(is_consistent(&conflict));

        conflict.refund_amount = Money::from_cents(250);
        assert!(!is_consistent(&conflict));
    }
}
