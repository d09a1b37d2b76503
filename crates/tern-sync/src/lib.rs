//! # tern-sync: Sync Orchestrator for Tern POS
//!
//! Reconciles sales recorded while offline with the ledger server, once it
//! is reachable again, without losing a sale or hiding a conflict.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Layer Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  SyncAgent (optional, tokio task)                │  │
//! │  │   poll interval · catalog interval · backoff · retention sweep   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ calls                                   │
//! │  ┌────────────────────────────▼─────────────────────────────────────┐  │
//! │  │                       SyncOrchestrator                           │  │
//! │  │                                                                  │  │
//! │  │  sync_pending · sync_catalog · acknowledge_conflict              │  │
//! │  │  needing_attention · run_retention_sweep · status                │  │
//! │  └──────┬──────────────────┬───────────────────┬────────────────────┘  │
//! │         ▼                  ▼                   ▼                        │
//! │  ┌──────────────┐  ┌────────────────┐  ┌────────────────────────┐      │
//! │  │  SyncClient  │  │   tern-db      │  │ Clock / SyncState      │      │
//! │  │  (HTTP,      │  │   Database     │  │ (injected, owned)      │      │
//! │  │   JSON DTOs) │  │                │  │                        │      │
//! │  └──────────────┘  └────────────────┘  └────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`orchestrator`] - `SyncOrchestrator` and its reports
//! - [`agent`] - Background driver with event emitter
//! - [`client`] - `SyncClient` seam and the reqwest implementation
//! - [`protocol`] - Wire documents
//! - [`config`] - TOML + environment configuration
//! - [`state`] - Sync health shared with the host
//! - [`clock`] - Injected time source
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tern_sync::{HttpSyncClient, SyncConfig, SyncOrchestrator, SystemClock};
//!
//! let config = SyncConfig::load(None)?;
//! let db = tern_db::Database::new(config.db_config()).await?;
//! let client = HttpSyncClient::new(config.server_url()?, &config.server)?;
//!
//! let orchestrator = SyncOrchestrator::new(
//!     db,
//!     Arc::new(client),
//!     Arc::new(SystemClock),
//!     config.sync.clone(),
//!     config.conflict_policy(),
//! );
//!
//! let report = orchestrator.sync_pending().await?;
//! println!("synced {}, conflicts {}", report.synced, report.conflicts);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod state;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{NoOpEmitter, SyncAgent, SyncAgentHandle, SyncEventEmitter, TracingEmitter};
pub use client::{HttpSyncClient, SyncClient};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ServerSettings, SyncConfig, SyncSettings};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{CatalogSyncReport, RetentionReport, SyncOrchestrator, SyncReport};
pub use state::{SyncState, SyncStatus};
