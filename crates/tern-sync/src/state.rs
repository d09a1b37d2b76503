//! # Sync State
//!
//! What the terminal currently knows about its sync health: whether the
//! server was reachable, whether a cycle is running, how many sales wait,
//! and how the last cycle ended.
//!
//! Owned by the orchestrator and shared (cheap clone) with the background
//! agent and UI pollers. There is no global instance.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use tern_core::Timestamp;
use tern_db::StatusCounts;

// =============================================================================
// Sync Status
// =============================================================================

/// Snapshot of the sync health for external queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    /// The last request reached the server. `false` until one has.
    pub online: bool,

    /// A sync cycle is running.
    pub in_flight: bool,

    /// Transactions waiting for a cycle (`pending` and `syncing`).
    pub pending_count: i64,

    /// Transactions rejected at least once and not yet synced.
    pub failed_count: i64,

    /// Transactions settled with reduced fulfillment.
    pub conflict_count: i64,

    /// End of the last cycle that completed without a local error.
    pub last_sync: Option<Timestamp>,

    /// Most recent transport, protocol or local error.
    pub last_error: Option<String>,
}

// =============================================================================
// State Manager
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct SyncState {
    status: Arc<RwLock<SyncStatus>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    pub async fn begin_cycle(&self) {
        self.status.write().await.in_flight = true;
    }

    /// Ends a cycle. `completed_at` is set when the cycle finished without a
    /// local error.
    pub async fn end_cycle(&self, completed_at: Option<Timestamp>) {
        let mut status = self.status.write().await;
        status.in_flight = false;
        if completed_at.is_some() {
            status.last_sync = completed_at;
        }
    }

    pub async fn update_counts(&self, counts: &StatusCounts) {
        let mut status = self.status.write().await;
        status.pending_count = counts.pending + counts.syncing;
        status.failed_count = counts.failed;
        status.conflict_count = counts.conflict;
    }

    /// A request got an answer from the server.
    pub async fn record_reachable(&self) {
        self.status.write().await.online = true;
    }

    /// A request could not reach the server.
    pub async fn record_unreachable(&self, error: impl Into<String>) {
        let mut status = self.status.write().await;
        status.online = false;
        status.last_error = Some(error.into());
    }

    pub async fn record_error(&self, error: impl Into<String>) {
        self.status.write().await.last_error = Some(error.into());
    }

    pub async fn clear_error(&self) {
        self.status.write().await.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cycle_bookkeeping() {
        let state = SyncState::new();
        assert_eq!(state.snapshot().await, SyncStatus::default());

        state.begin_cycle().await;
        assert!(state.snapshot().await.in_flight);

        state.record_unreachable("Connection failed: refused").await;
        state.end_cycle(None).await;

        let status = state.snapshot().await;
        assert!(!status.in_flight);
        assert!(!status.online);
        assert!(status.last_sync.is_none());
        assert_eq!(status.last_error.as_deref(), Some("Connection failed: refused"));

        let done = Timestamp::from_millis(5_000).unwrap();
        state.record_reachable().await;
        state.clear_error().await;
        state.end_cycle(Some(done)).await;

        let status = state.snapshot().await;
        assert!(status.online);
        assert_eq!(status.last_sync, Some(done));
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_counts() {
        let state = SyncState::new();
        let counts = StatusCounts {
            pending: 3,
            syncing: 2,
            synced: 10,
            conflict: 1,
            failed: 4,
        };
        state.update_counts(&counts).await;

        let status = state.snapshot().await;
        assert_eq!(status.pending_count, 5);
        assert_eq!(status.failed_count, 4);
        assert_eq!(status.conflict_count, 1);
    }
}
