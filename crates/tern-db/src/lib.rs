//! # tern-db: Local Durable Store for Tern POS
//!
//! Everything the terminal needs to keep selling while the server is out of
//! reach: the cached catalog, the queue of unsynced sales, stock
//! reservations, the outbox and sync bookkeeping. SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tern POS Data Flow                               │
//! │                                                                         │
//! │  Checkout UI (record_sale)          tern-sync (orchestrator)            │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tern-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐   │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │   │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │   │   │
//! │  │   │               │    │ Products      │    │              │   │   │
//! │  │   │ SqlitePool    │◄───│ Transactions  │    │ 001_offline_ │   │   │
//! │  │   │ WAL, NORMAL   │    │ Reservations  │    │  store.sql   │   │   │
//! │  │   │               │    │ SyncQueue     │    │              │   │   │
//! │  │   │               │    │ Metadata      │    │              │   │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘   │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              SQLite Database (terminal.db)                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The store never reads the clock. Every mutating call takes the time to
//! stamp as an argument, so callers (and tests) decide what "now" is.
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tern_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("terminal.db")).await?;
//!
//! let available = db.products().local_stock("cola").await?;
//! let tx = db.transactions().record_sale(&sale, now).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::metadata::{catalog_sync_key, SyncMetadataRepository, LAST_SYNC_COMPLETED_AT};
pub use repository::product::CachedProductRepository;
pub use repository::reservation::ReservationRepository;
pub use repository::sync::SyncQueueRepository;
pub use repository::transaction::{RevertCounts, StatusCounts, TransactionRepository};
