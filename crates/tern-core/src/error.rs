//! # Error Types
//!
//! Domain-specific error types for tern-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tern-core errors (this file)                                          │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tern-db errors (separate crate)                                       │
//! │  └── DbError          - Durable store failures                         │
//! │                                                                         │
//! │  tern-sync errors (separate crate)                                     │
//! │  └── SyncError        - Config, transport, protocol failures           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A conflict verdict from the server is NOT an error. It is modeled as a
//! [`ConflictResolution`](crate::types::ConflictResolution) on the
//! transaction record.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A transaction is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Acknowledging a transaction that is not in `conflict`
    /// - Acknowledging a conflict that was already acknowledged
    #[error("Transaction {transaction_id} is {current_status}, cannot {operation}")]
    InvalidTransactionStatus {
        transaction_id: String,
        current_status: String,
        operation: String,
    },

    /// A sale has more lines than a single transaction may carry.
    #[error("Sale cannot have more than {max} lines")]
    TooManyLines { max: usize },

    /// Line quantity exceeds maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// A stored document (line items, resolution, snapshot) could not be decoded.
    #[error("Malformed {what}: {reason}")]
    MalformedDocument { what: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before anything is persisted, so a rejected sale never reserves
/// stock.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID, invalid timestamp).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InvalidTransactionStatus {
            transaction_id: "tx-1".to_string(),
            current_status: "synced".to_string(),
            operation: "acknowledge conflict".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Transaction tx-1 is synced, cannot acknowledge conflict"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "cashier_id".to_string(),
        };
        assert_eq!(err.to_string(), "cashier_id is required");

        let err = ValidationError::MustBePositive {
            field: "items[0].quantity".to_string(),
        };
        assert_eq!(err.to_string(), "items[0].quantity must be positive");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "store_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
