//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐  │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │  │
//! │  │                 │  │                 │  │                         │  │
//! │  │  InvalidConfig  │  │  Connection     │  │  InvalidResponse        │  │
//! │  │  InvalidUrl     │  │  Timeout        │  │  Serialization          │  │
//! │  │  ConfigLoad     │  │  HttpStatus     │  │  Deserialization        │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘  │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                               │
//! │  │    Database     │  │     State       │                               │
//! │  │                 │  │                 │                               │
//! │  │  Database       │  │  ShuttingDown   │                               │
//! │  │  (from tern-db) │  │  Internal       │                               │
//! │  └─────────────────┘  └─────────────────┘                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport and protocol errors never escape `sync_pending`: they are
//! recorded on the affected transactions. Only local storage failures do.

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid server URL.
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The server could not be reached.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The request did not complete in time.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The server answered with a non-success status.
    #[error("Server returned HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// The response was well-formed JSON but not a valid answer.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Local durable store failure.
    #[error("Database error: {0}")]
    Database(#[from] tern_db::DbError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            SyncError::DeserializationFailed(err.to_string())
        } else {
            SyncError::SerializationFailed(err.to_string())
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // The configured limit is not known here; the client reports it
            // itself when it can.
            SyncError::Timeout(0)
        } else if err.is_decode() {
            SyncError::DeserializationFailed(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::HttpStatus {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_builder() {
            SyncError::InvalidUrl(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if a later attempt may succeed without any change on
    /// this terminal.
    ///
    /// ## Retryable Errors
    /// - Connection failures and timeouts
    /// - Server-side (5xx), throttling (429) and request timeout (408)
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Client errors (4xx) and malformed responses
    /// - Local database failures
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_) | SyncError::Timeout(_) => true,
            SyncError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the server answered but the answer was unusable.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidResponse(_)
                | SyncError::SerializationFailed(_)
                | SyncError::DeserializationFailed(_)
        )
    }

    /// Returns true for failures of the request as a whole, which put a
    /// whole batch back to `pending`.
    pub fn is_request_failure(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Timeout(_)
                | SyncError::HttpStatus { .. }
        ) || self.is_protocol_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());
        assert!(SyncError::HttpStatus { status: 503, message: "down".into() }.is_retryable());
        assert!(SyncError::HttpStatus { status: 429, message: "slow down".into() }.is_retryable());

        assert!(!SyncError::HttpStatus { status: 400, message: "bad".into() }.is_retryable());
        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::InvalidResponse("no results".into()).is_retryable());
    }

    #[test]
    fn test_request_failures() {
        assert!(SyncError::HttpStatus { status: 400, message: "bad".into() }.is_request_failure());
        assert!(SyncError::DeserializationFailed("eof".into()).is_request_failure());
        assert!(!SyncError::ShuttingDown.is_request_failure());
        assert!(!SyncError::from(tern_db::DbError::PoolExhausted).is_request_failure());
    }

    #[test]
    fn test_json_errors_categorized() {
        let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        assert!(matches!(SyncError::from(err), SyncError::DeserializationFailed(_)));
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::HttpStatus {
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "Server returned HTTP 502: bad gateway");
    }
}
