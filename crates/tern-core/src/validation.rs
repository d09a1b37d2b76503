//! # Validation Module
//!
//! Checks a [`NewSale`] before anything is persisted or reserved.
//!
//! ## Where It Sits
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Checkout UI                                                            │
//! │  ├── consults local_stock() before allowing a quantity                  │
//! │  └── submits NewSale                                                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  validate_new_sale() ← THIS MODULE                                      │
//! │  ├── references present                                                 │
//! │  ├── 1..=MAX_SALE_LINES lines                                           │
//! │  └── per line: quantity, price, discount                                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  TransactionRepository::record_sale (one durable-store transaction)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stock is NOT checked here. Overselling while offline is allowed and is
//! settled by the conflict engine once the server rules.

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{NewLineItem, NewSale};
use crate::{MAX_ITEM_QUANTITY, MAX_SALE_LINES, MAX_SALE_TAX_CENTS, MAX_UNIT_PRICE_CENTS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest free-text note accepted on a sale.
pub const MAX_NOTES_LENGTH: usize = 500;

// =============================================================================
// Sale Validation
// =============================================================================

/// Validates a sale as submitted by the checkout UI.
///
/// ## Example
/// ```rust
/// use tern_core::money::Money;
/// use tern_core::types::{NewLineItem, NewSale, PaymentMethod, ReceiptSnapshot};
/// use tern_core::validation::validate_new_sale;
///
/// let sale = NewSale {
///     terminal_id: "T-01".into(),
///     store_id: "store-1".into(),
///     cashier_id: "cashier-1".into(),
///     session_id: None,
///     customer_id: None,
///     items: vec![NewLineItem {
///         product_id: "p1".into(),
///         inventory_id: "inv-p1".into(),
///         sku: "WATER-500".into(),
///         product_name: "Water 500ml".into(),
///         unit_price: Money::from_cents(150),
///         quantity: 2,
///         discount: Money::zero(),
///     }],
///     tax: Money::zero(),
///     payment_method: PaymentMethod::Cash,
///     notes: None,
///     snapshot: ReceiptSnapshot::default(),
/// };
/// assert!(validate_new_sale(&sale).is_ok());
/// ```
pub fn validate_new_sale(sale: &NewSale) -> CoreResult<()> {
    validate_reference("terminal_id", &sale.terminal_id)?;
    validate_reference("store_id", &sale.store_id)?;
    validate_reference("cashier_id", &sale.cashier_id)?;

    if sale.items.is_empty() {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        }
        .into());
    }

    if sale.items.len() > MAX_SALE_LINES {
        return Err(CoreError::TooManyLines {
            max: MAX_SALE_LINES,
        });
    }

    for (index, item) in sale.items.iter().enumerate() {
        validate_line(index, item)?;
    }

    validate_amount("tax", sale.tax, MAX_SALE_TAX_CENTS)?;

    if let Some(notes) = &sale.notes {
        if notes.chars().count() > MAX_NOTES_LENGTH {
            return Err(ValidationError::TooLong {
                field: "notes".to_string(),
                max: MAX_NOTES_LENGTH,
            }
            .into());
        }
    }

    Ok(())
}

/// Validates one checkout line.
///
/// ## Rules
/// - product and inventory references present
/// - quantity in `1..=MAX_ITEM_QUANTITY`
/// - price in `0..=MAX_UNIT_PRICE_CENTS`
/// - discount non-negative and at most the line gross
fn validate_line(index: usize, item: &NewLineItem) -> CoreResult<()> {
    let field = |name: &str| format!("items[{}].{}", index, name);

    validate_reference(&field("product_id"), &item.product_id)?;
    validate_reference(&field("inventory_id"), &item.inventory_id)?;

    if item.quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field("quantity"),
        }
        .into());
    }

    if item.quantity > MAX_ITEM_QUANTITY {
        return Err(CoreError::QuantityTooLarge {
            requested: item.quantity,
            max: MAX_ITEM_QUANTITY,
        });
    }

    validate_amount(&field("unit_price"), item.unit_price, MAX_UNIT_PRICE_CENTS)?;
    validate_non_negative(&field("discount"), item.discount)?;

    let gross = item
        .unit_price
        .checked_multiply_quantity(item.quantity)
        .ok_or_else(|| ValidationError::OutOfRange {
            field: field("unit_price"),
            min: 0,
            max: MAX_UNIT_PRICE_CENTS,
        })?;
    if item.discount > gross {
        return Err(ValidationError::OutOfRange {
            field: field("discount"),
            min: 0,
            max: gross.cents(),
        }
        .into());
    }

    Ok(())
}

// =============================================================================
// Field Validators
// =============================================================================

/// A reference (id) must be present and not blank.
pub fn validate_reference(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > 100 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 100,
        });
    }

    Ok(())
}

/// An amount in `0..=max` minor units.
pub fn validate_amount(field: &str, amount: Money, max: i64) -> ValidationResult<()> {
    validate_non_negative(field, amount)?;

    if amount.cents() > max {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max,
        });
    }

    Ok(())
}

/// Amounts entered at checkout are never negative.
pub fn validate_non_negative(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates a UUID string.
///
/// ```rust
/// use tern_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PaymentMethod, ReceiptSnapshot};

    fn item(quantity: i64, price: i64, discount: i64) -> NewLineItem {
        NewLineItem {
            product_id: "p1".to_string(),
            inventory_id: "inv-p1".to_string(),
            sku: "P1".to_string(),
            product_name: "Product 1".to_string(),
            unit_price: Money::from_cents(price),
            quantity,
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
            tax: Money::zero(),
            payment_method: PaymentMethod::Card,
            notes: None,
            snapshot: ReceiptSnapshot::default(),
        }
    }

    #[test]
    fn test_accepts_well_formed_sale() {
        assert!(validate_new_sale(&sale(vec![item(2, 150, 50)])).is_ok());
    }

    #[test]
    fn test_rejects_oversized_amounts() {
        let err = validate_new_sale(&sale(vec![item(3, i64::MAX / 2, 0)])).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::OutOfRange { ref field, .. })
                if field == "items[0].unit_price"
        ));

        assert!(validate_new_sale(&sale(vec![item(999, MAX_UNIT_PRICE_CENTS, 0)])).is_ok());
        assert!(validate_new_sale(&sale(vec![item(1, MAX_UNIT_PRICE_CENTS + 1, 0)])).is_err());

        let mut taxed = sale(vec![item(1, 100, 0)]);
        taxed.tax = Money::from_cents(MAX_SALE_TAX_CENTS + 1);
        assert!(validate_new_sale(&taxed).is_err());
    }

    #[test]
    fn test_requires_lines_and_references() {
        assert!(validate_new_sale(&sale(vec![])).is_err());

        let mut missing_cashier = sale(vec![item(1, 100, 0)]);
        missing_cashier.cashier_id = "  ".to_string();
        let err = validate_new_sale(&missing_cashier).unwrap_err();
        assert_eq!(err.to_string(), "Validation error: cashier_id is required");
    }

    #[test]
    fn test_rejects_bad_quantities() {
        assert!(validate_new_sale(&sale(vec![item(0, 100, 0)])).is_err());
        assert!(validate_new_sale(&sale(vec![item(-1, 100, 0)])).is_err());
        assert!(matches!(
            validate_new_sale(&sale(vec![item(MAX_ITEM_QUANTITY + 1, 100, 0)])),
            Err(CoreError::QuantityTooLarge { .. })
        ));
    }

    #[test]
    fn test_rejects_discount_above_gross() {
        assert!(validate_new_sale(&sale(vec![item(2, 100, 200)])).is_ok());
        assert!(validate_new_sale(&sale(vec![item(2, 100, 201)])).is_err());
        assert!(validate_new_sale(&sale(vec![item(2, 100, -1)])).is_err());
    }

    #[test]
    fn test_rejects_too_many_lines() {
        let lines = (0..=MAX_SALE_LINES).map(|_| item(1, 100, 0)).collect();
        assert!(matches!(
            validate_new_sale(&sale(lines)),
            Err(CoreError::TooManyLines { .. })
        ));
    }

    #[test]
    fn test_rejects_long_notes() {
        let mut long_notes = sale(vec![item(1, 100, 0)]);
        long_notes.notes = Some("x".repeat(MAX_NOTES_LENGTH + 1));
        assert!(validate_new_sale(&long_notes).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("123").is_err());
    }
}
