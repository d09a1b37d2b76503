//! # Receipt Materializer
//!
//! Rebuilds a printable receipt from a stored transaction alone.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PendingTransaction (any status)                                        │
//! │  ├── snapshot ─────────────► header (store, cashier, terminal)          │
//! │  ├── items ────────────────► lines (fulfilled qty if known, else req)   │
//! │  ├── totals, payment ──────► totals block                               │
//! │  └── conflict? ────────────► refund, adjusted total, message            │
//! │                                    │                                    │
//! │                                    ▼                                    │
//! │                             ReceiptView ──► render_text(width)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No store or network access: a receipt can always be reprinted offline.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::types::{PendingTransaction, TransactionStatus};

// =============================================================================
// View Model
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReceiptHeader {
    pub store_name: String,
    pub store_address: Option<String>,
    pub store_phone: Option<String>,
    pub store_tax_id: Option<String>,
    pub receipt_number: String,
    pub server_sale_number: Option<String>,
    pub cashier_name: String,
    pub terminal_name: String,
    /// `YYYY-MM-DD HH:MM` (UTC).
    pub issued_at: String,
    pub status_label: String,
    /// The server has not ruled yet; quantities and totals may still change.
    pub provisional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReceiptLine {
    pub name: String,
    pub sku: String,
    pub quantity: i64,
    /// Set when fewer units were honored than rung up.
    pub requested_quantity: Option<i64>,
    #[ts(as = "i64")]
    pub unit_price: Money,
    #[ts(as = "i64")]
    pub discount: Money,
    #[ts(as = "i64")]
    pub line_total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReceiptAdjustment {
    #[ts(as = "i64")]
    pub refund: Money,
    #[ts(as = "i64")]
    pub adjusted_total: Money,
    pub message: String,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReceiptView {
    pub header: ReceiptHeader,
    pub lines: Vec<ReceiptLine>,
    #[ts(as = "i64")]
    pub subtotal: Money,
    #[ts(as = "i64")]
    pub discount: Money,
    #[ts(as = "i64")]
    pub tax: Money,
    #[ts(as = "i64")]
    pub total: Money,
    pub payment_method: String,
    pub notes: Option<String>,
    pub adjustment: Option<ReceiptAdjustment>,
}

// =============================================================================
// Materialize
// =============================================================================

/// Builds the receipt view for a transaction in any status.
///
/// Line totals use the quantity the customer takes home: fulfilled when the
/// server has ruled, requested otherwise. The totals block is always the one
/// computed at checkout; a conflict adds an adjustment block instead of
/// rewriting it.
pub fn materialize(tx: &PendingTransaction) -> ReceiptView {
    let provisional = !tx.status.is_finalized();

    let header = ReceiptHeader {
        store_name: tx.snapshot.store_name.clone(),
        store_address: tx.snapshot.store_address.clone(),
        store_phone: tx.snapshot.store_phone.clone(),
        store_tax_id: tx.snapshot.store_tax_id.clone(),
        receipt_number: tx.local_receipt_number.clone(),
        server_sale_number: tx.server_sale_number.clone(),
        cashier_name: tx.snapshot.cashier_name.clone(),
        terminal_name: tx.snapshot.terminal_name.clone(),
        issued_at: tx.created_at.receipt_format(),
        status_label: tx.status.receipt_label().to_string(),
        provisional,
    };

    let lines = tx
        .items
        .iter()
        .map(|item| {
            let quantity = item.effective_quantity();
            let gross = item.unit_price.multiply_quantity(quantity);
            // A line that delivered nothing carries no charge at all.
            let discount = if quantity == 0 { Money::zero() } else { item.discount };
            ReceiptLine {
                name: item.product_name.clone(),
                sku: item.sku.clone(),
                quantity,
                requested_quantity: (quantity != item.requested_quantity)
                    .then_some(item.requested_quantity),
                unit_price: item.unit_price,
                discount,
                line_total: (gross - discount).non_negative(),
            }
        })
        .collect();

    let adjustment = match (&tx.conflict, tx.status) {
        (Some(conflict), TransactionStatus::Conflict) => Some(ReceiptAdjustment {
            refund: conflict.refund_amount,
            adjusted_total: conflict.adjusted_total + tx.totals.tax,
            message: conflict.message.clone(),
            acknowledged: conflict.is_acknowledged(),
        }),
        _ => None,
    };

    ReceiptView {
        header,
        lines,
        subtotal: tx.totals.subtotal,
        discount: tx.totals.discount,
        tax: tx.totals.tax,
        total: tx.totals.total,
        payment_method: tx.payment_method.label().to_string(),
        notes: tx.notes.clone(),
        adjustment,
    }
}

// =============================================================================
// Plain-Text Rendering
// =============================================================================

/// Narrowest layout that still fits a label and an amount.
const MIN_WIDTH: usize = 24;

/// Renders a fixed-width text receipt for thermal printers and previews.
pub fn render_text(view: &ReceiptView, width: usize) -> String {
    let width = width.max(MIN_WIDTH);
    let mut out = Vec::new();
    let rule = "-".repeat(width);

    out.push(center(&view.header.store_name, width));
    for extra in [
        &view.header.store_address,
        &view.header.store_phone,
        &view.header.store_tax_id,
    ]
    .into_iter()
    .flatten()
    {
        out.push(center(extra, width));
    }
    out.push(rule.clone());

    out.push(pair("Receipt", &view.header.receipt_number, width));
    if let Some(number) = &view.header.server_sale_number {
        out.push(pair("Sale", number, width));
    }
    out.push(pair("Date", &view.header.issued_at, width));
    out.push(pair("Cashier", &view.header.cashier_name, width));
    out.push(pair("Terminal", &view.header.terminal_name, width));
    out.push(pair("Status", &view.header.status_label, width));
    out.push(rule.clone());

    for line in &view.lines {
        out.push(truncate(&line.name, width));
        let qty = match line.requested_quantity {
            Some(requested) => format!("  {}/{} x {}", line.quantity, requested, line.unit_price),
            None => format!("  {} x {}", line.quantity, line.unit_price),
        };
        out.push(pair(&qty, &line.line_total.to_string(), width));
        if line.discount.is_positive() {
            out.push(pair("  Discount", &format!("-{}", line.discount), width));
        }
    }
    out.push(rule.clone());

    out.push(pair("Subtotal", &view.subtotal.to_string(), width));
    if view.discount.is_positive() {
        out.push(pair("Discount", &format!("-{}", view.discount), width));
    }
    out.push(pair("Tax", &view.tax.to_string(), width));
    out.push(pair("TOTAL", &view.total.to_string(), width));
    out.push(pair("Paid by", &view.payment_method, width));

    if let Some(adjustment) = &view.adjustment {
        out.push(rule.clone());
        out.push(pair("Refund", &adjustment.refund.to_string(), width));
        out.push(pair("Adjusted total", &adjustment.adjusted_total.to_string(), width));
        out.extend(wrap(&adjustment.message, width));
    }

    if let Some(notes) = &view.notes {
        out.push(rule.clone());
        out.extend(wrap(notes, width));
    }

    if view.header.provisional {
        out.push(rule);
        out.push(center("PROVISIONAL - PENDING SYNC", width));
    }

    let mut text = out.join("\n");
    text.push('\n');
    text
}

fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

fn center(text: &str, width: usize) -> String {
    let text = truncate(text, width);
    let pad = (width - text.chars().count()) / 2;
    format!("{}{}", " ".repeat(pad), text)
}

/// Label left, value right; the label yields space to the value.
fn pair(label: &str, value: &str, width: usize) -> String {
    let value = truncate(value, width);
    let room = width - value.chars().count();
    let label = if room == 0 {
        String::new()
    } else {
        truncate(label, room - 1)
    };
    let gap = width - label.chars().count() - value.chars().count();
    format!("{}{}{}", label, " ".repeat(gap), value)
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let word = truncate(word, width);
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{resolve, StockSnapshot};
    use crate::time::Timestamp;
    use crate::types::{NewLineItem, NewSale, PaymentMethod, ReceiptSnapshot};

    fn transaction() -> PendingTransaction {
        let items = vec![
            NewLineItem {
                product_id: "cola".to_string(),
                inventory_id: "inv-cola".to_string(),
                sku: "COLA-330".to_string(),
                product_name: "Cola 330ml".to_string(),
                unit_price: Money::from_cents(100),
                quantity: 8,
                discount: Money::zero(),
            },
            NewLineItem {
                product_id: "chips".to_string(),
                inventory_id: "inv-chips".to_string(),
                sku: "CHIPS".to_string(),
                product_name: "Chips".to_string(),
                unit_price: Money::from_cents(250),
                quantity: 2,
                discount: Money::from_cents(50),
            },
        ];

        NewSale {
            terminal_id: "T-01".to_string(),
            store_id: "store-1".to_string(),
            cashier_id: "cashier-1".to_string(),
            session_id: None,
            customer_id: None,
            items,
            tax: Money::from_cents(100),
            payment_method: PaymentMethod::Cash,
            notes: Some("Bag requested".to_string()),
            snapshot: ReceiptSnapshot {
                store_name: "Corner Store".to_string(),
                store_address: Some("1 Main St".to_string()),
                store_phone: None,
                store_tax_id: None,
                cashier_name: "Dana".to_string(),
                terminal_name: "Front 1".to_string(),
            },
        }
        .into_transaction(
            "tx-1".to_string(),
            "20260301-01-0001".to_string(),
            Timestamp::parse("2026-03-01T09:15:00Z").unwrap(),
        )
    }

    #[test]
    fn test_pending_receipt_is_provisional_with_requested_quantities() {
        let view = materialize(&transaction());

        assert!(view.header.provisional);
        assert_eq!(view.header.status_label, "PENDING SYNC");
        assert_eq!(view.header.issued_at, "2026-03-01 09:15");
        assert_eq!(view.lines[0].quantity, 8);
        assert_eq!(view.lines[0].requested_quantity, None);
        assert_eq!(view.lines[0].line_total.cents(), 800);
        assert_eq!(view.lines[1].line_total.cents(), 450);
        assert_eq!(view.total.cents(), 800 + 500 - 50 + 100);
        assert!(view.adjustment.is_none());
    }

    #[test]
    fn test_conflict_receipt_uses_fulfilled_quantities() {
        let mut tx = transaction();
        let stock: StockSnapshot = [("cola", 5), ("chips", 0)].into_iter().collect();
        let conflict = resolve(&tx.items, &stock, tx.created_at).conflict.unwrap();
        tx.apply_fulfillment(Some(&conflict));
        tx.status = TransactionStatus::Conflict;
        tx.server_sale_number = Some("S-1042".to_string());
        tx.conflict = Some(conflict);

        let view = materialize(&tx);

        assert!(!view.header.provisional);
        assert_eq!(view.header.server_sale_number.as_deref(), Some("S-1042"));
        assert_eq!(view.lines[0].quantity, 5);
        assert_eq!(view.lines[0].requested_quantity, Some(8));
        assert_eq!(view.lines[0].line_total.cents(), 500);
        assert_eq!(view.lines[1].quantity, 0);
        assert_eq!(view.lines[1].line_total, Money::zero());

        let adjustment = view.adjustment.unwrap();
        assert_eq!(adjustment.refund.cents(), 300 + 450);
        assert_eq!(adjustment.adjusted_total.cents(), 500 + 100);
        assert!(!adjustment.acknowledged);
    }

    #[test]
    fn test_render_text_fits_width() {
        let view = materialize(&transaction());
        let text = render_text(&view, 32);

        assert!(text.lines().all(|line| line.chars().count() <= 32));
        assert!(text.contains("Corner Store"));
        assert!(text.contains("20260301-01-0001"));
        assert!(text.contains("TOTAL"));
        assert!(text.contains("$13.50"));
        assert!(text.contains("PROVISIONAL"));
        assert!(text.contains("Bag requested"));
    }

    #[test]
    fn test_render_text_shows_adjustment() {
        let mut tx = transaction();
        let stock: StockSnapshot = [("cola", 5), ("chips", 2)].into_iter().collect();
        let conflict = resolve(&tx.items, &stock, tx.created_at).conflict.unwrap();
        tx.apply_fulfillment(Some(&conflict));
        tx.status = TransactionStatus::Conflict;
        tx.conflict = Some(conflict);

        let text = render_text(&materialize(&tx), 40);

        assert!(text.contains("5/8 x $1.00"));
        assert!(text.contains("Refund"));
        assert!(text.contains("Stock shortage"));
        assert!(!text.contains("PROVISIONAL"));
    }

    #[test]
    fn test_render_text_survives_tiny_width() {
        let view = materialize(&transaction());
        let text = render_text(&view, 3);
        assert!(text.lines().all(|line| line.chars().count() <= MIN_WIDTH));
    }
}
