//! # Sync Orchestrator
//!
//! Submits offline sales to the ledger server and applies its verdicts.
//!
//! ## Sync Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        sync_pending()                                   │
//! │                                                                         │
//! │  1. try_lock the cycle mutex ──── busy ───► SyncReport::skipped()       │
//! │  2. syncing leftovers ──► pending  (interrupted cycle)                  │
//! │  3. select pending + failed below the attempt cap, oldest first         │
//! │  4. for each batch of `batch_size`:                                     │
//! │                                                                         │
//! │     mark syncing ──► POST batch ──┬── response ──► per transaction:     │
//! │                                   │     success  → synced   + release   │
//! │                                   │     conflict → conflict + release   │
//! │                                   │     failed   → failed, attempts+1   │
//! │                                   │     missing  → failed, attempts+1   │
//! │                                   │                                     │
//! │                                   └── request failure ──► whole batch   │
//! │                                         back to pending, attempts+1,    │
//! │                                         reservations held; failed once  │
//! │                                         attempts reach the cap          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Errors
//! Transport and protocol failures are recorded on the transactions, never
//! returned. `sync_pending` fails only when the durable store does.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use tern_core::conflict::is_consistent;
use tern_core::{CachedProduct, ConflictPolicy, PendingTransaction, Timestamp};
use tern_db::{catalog_sync_key, Database, DbError, DbResult, LAST_SYNC_COMPLETED_AT};

use crate::client::SyncClient;
use crate::clock::Clock;
use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{OutcomeStatus, SubmitBatchRequest, SubmitBatchResponse, TransactionOutcome};
use crate::state::{SyncState, SyncStatus};

// =============================================================================
// Reports
// =============================================================================

/// What one `sync_pending` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Another cycle was running; nothing was touched.
    pub skipped: bool,
    /// `syncing` leftovers returned to `pending` before selection.
    pub recovered: u64,
    pub batches: usize,
    /// Batches whose request failed as a whole.
    pub failed_batches: usize,
    pub attempted: usize,
    pub synced: usize,
    pub conflicts: usize,
    /// Conflicts the policy accepted without a supervisor.
    pub auto_accepted: usize,
    /// Transactions rejected individually (including missing verdicts).
    pub failed: usize,
    /// Transactions put back to `pending` by a request failure.
    pub reverted: usize,
    /// Transactions a request failure left out of attempts (now `failed`).
    pub exhausted: usize,
}

impl SyncReport {
    pub fn skipped() -> Self {
        SyncReport {
            skipped: true,
            ..Default::default()
        }
    }

    /// Every batch of the cycle failed at request level.
    pub fn all_batches_failed(&self) -> bool {
        self.batches > 0 && self.failed_batches == self.batches
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogSyncReport {
    pub store_id: String,
    /// Watermark the fetch started from.
    pub since: Option<Timestamp>,
    pub updated: usize,
    /// Watermark stored for the next fetch.
    pub watermark: Timestamp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub transactions_purged: u64,
    pub outbox_entries_purged: u64,
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct SyncOrchestrator {
    db: Database,
    client: Arc<dyn SyncClient>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    policy: ConflictPolicy,
    terminal_id: Option<String>,
    state: SyncState,
    /// Held for the duration of a sync cycle.
    cycle: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        db: Database,
        client: Arc<dyn SyncClient>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
        policy: ConflictPolicy,
    ) -> Self {
        SyncOrchestrator {
            db,
            client,
            clock,
            settings,
            policy,
            terminal_id: None,
            state: SyncState::new(),
            cycle: Mutex::new(()),
        }
    }

    /// Stamps catalog entries fetched by this orchestrator with a terminal.
    pub fn with_terminal_id(mut self, terminal_id: impl Into<String>) -> Self {
        self.terminal_id = Some(terminal_id.into());
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn policy(&self) -> &ConflictPolicy {
        &self.policy
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Shared handle on the sync state.
    pub fn state(&self) -> SyncState {
        self.state.clone()
    }

    pub async fn status(&self) -> SyncStatus {
        self.state.snapshot().await
    }

    /// Re-reads the per-status counters into the sync state.
    pub async fn refresh_status(&self) -> SyncResult<SyncStatus> {
        let counts = self.db.transactions().count_by_status().await?;
        self.state.update_counts(&counts).await;
        Ok(self.state.snapshot().await)
    }

    // =========================================================================
    // Sale Sync
    // =========================================================================

    /// Runs one sync cycle over every retriable transaction.
    ///
    /// A call made while another cycle runs returns
    /// [`SyncReport::skipped`] immediately.
    pub async fn sync_pending(&self) -> SyncResult<SyncReport> {
        let Ok(_guard) = self.cycle.try_lock() else {
            debug!("Sync cycle already running, skipping");
            return Ok(SyncReport::skipped());
        };

        self.state.begin_cycle().await;
        let outcome = self.run_cycle().await;

        let completed_at = match &outcome {
            Ok(_) => Some(self.clock.now()),
            Err(e) => {
                error!(error = %e, "Sync cycle aborted");
                self.state.record_error(e.to_string()).await;
                None
            }
        };

        if let Some(at) = completed_at {
            if let Err(e) = self
                .db
                .metadata()
                .set_timestamp(LAST_SYNC_COMPLETED_AT, at, at)
                .await
            {
                warn!(error = %e, "Failed to record sync completion time");
            }
        }
        if let Err(e) = self.refresh_status().await {
            warn!(error = %e, "Failed to refresh sync counters");
        }
        self.state.end_cycle(completed_at).await;

        outcome
    }

    async fn run_cycle(&self) -> SyncResult<SyncReport> {
        let transactions = self.db.transactions();

        let mut report = SyncReport {
            recovered: transactions.recover_interrupted().await?,
            ..Default::default()
        };

        let queue = transactions.list_retriable(self.settings.max_attempts).await?;
        if queue.is_empty() {
            debug!("Nothing to sync");
            return Ok(report);
        }

        let batch_size = self.settings.batch_size.max(1);
        info!(
            count = queue.len(),
            batches = queue.len().div_ceil(batch_size),
            "Starting sync cycle"
        );

        for batch in queue.chunks(batch_size) {
            self.sync_batch(batch, &mut report).await?;
        }

        info!(
            synced = report.synced,
            conflicts = report.conflicts,
            failed = report.failed,
            reverted = report.reverted,
            "Sync cycle finished"
        );
        Ok(report)
    }

    async fn sync_batch(
        &self,
        batch: &[PendingTransaction],
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let ids: Vec<String> = batch.iter().map(|tx| tx.id.clone()).collect();
        self.db
            .transactions()
            .mark_syncing(&ids, self.clock.now())
            .await?;

        report.batches += 1;
        report.attempted += batch.len();

        let request = SubmitBatchRequest::from_batch(batch);
        match self.client.submit_batch(&request).await {
            Ok(response) => {
                self.state.record_reachable().await;
                self.apply_response(batch, response, report).await
            }
            Err(err) => {
                report.failed_batches += 1;
                let message = err.to_string();
                warn!(error = %message, size = batch.len(), "Batch request failed");

                if matches!(err, SyncError::ConnectionFailed(_) | SyncError::Timeout(_)) {
                    self.state.record_unreachable(message.clone()).await;
                } else {
                    self.state.record_error(message.clone()).await;
                }

                let counts = self
                    .db
                    .transactions()
                    .revert_to_pending(&ids, &message, self.settings.max_attempts, self.clock.now())
                    .await?;
                report.reverted += counts.requeued as usize;
                report.exhausted += counts.exhausted as usize;
                Ok(())
            }
        }
    }

    async fn apply_response(
        &self,
        batch: &[PendingTransaction],
        response: SubmitBatchResponse,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let mut outcomes: HashMap<String, TransactionOutcome> = response
            .results
            .into_iter()
            .map(|outcome| (outcome.transaction_id.clone(), outcome))
            .collect();
        let at = self.clock.now();

        for transaction in batch {
            match outcomes.remove(&transaction.id) {
                Some(outcome) => self.apply_outcome(&transaction.id, outcome, at, report).await?,
                None => {
                    self.fail(&transaction.id, "No result for transaction in server response", at, report)
                        .await?
                }
            }
        }

        if !outcomes.is_empty() {
            warn!(
                count = outcomes.len(),
                "Server returned results for transactions outside the batch"
            );
        }
        Ok(())
    }

    async fn apply_outcome(
        &self,
        id: &str,
        outcome: TransactionOutcome,
        at: Timestamp,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let transactions = self.db.transactions();
        let sale_id = outcome.sale_id.as_deref().filter(|s| !s.is_empty());
        let sale_number = outcome.sale_number.as_deref().filter(|s| !s.is_empty());

        match outcome.status {
            OutcomeStatus::Success => {
                let (Some(sale_id), Some(sale_number)) = (sale_id, sale_number) else {
                    return self.fail(id, "Success verdict without a sale reference", at, report).await;
                };
                if skip_stale(id, transactions.mark_synced(id, sale_id, sale_number, at).await)?
                    .is_some()
                {
                    report.synced += 1;
                }
            }
            OutcomeStatus::Conflict => {
                let (Some(sale_id), Some(sale_number), Some(payload)) =
                    (sale_id, sale_number, outcome.conflict)
                else {
                    return self.fail(id, "Conflict verdict without a resolution", at, report).await;
                };

                let mut resolution = payload.into_resolution(at);
                if !is_consistent(&resolution) {
                    warn!(id = %id, "Server resolution does not add up; storing it as received");
                }
                let accepted = self.policy.apply(&mut resolution, at);

                let stored = transactions
                    .mark_conflict(id, sale_id, sale_number, &resolution, at)
                    .await;
                if skip_stale(id, stored)?.is_some() {
                    report.conflicts += 1;
                    if accepted {
                        report.auto_accepted += 1;
                    }
                }
            }
            OutcomeStatus::Failed => {
                let error = outcome
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "Rejected by server".to_string());
                return self.fail(id, &error, at, report).await;
            }
        }

        Ok(())
    }

    async fn fail(
        &self,
        id: &str,
        error: &str,
        at: Timestamp,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let result = self.db.transactions().mark_failed(id, error, at).await;
        if skip_stale(id, result)?.is_some() {
            report.failed += 1;
        }
        Ok(())
    }

    // =========================================================================
    // Catalog Sync
    // =========================================================================

    /// Pulls products of a store changed since the stored watermark.
    ///
    /// The watermark advances (to the server time when given, else the
    /// clock) only after the products are stored.
    pub async fn sync_catalog(&self, store_id: &str) -> SyncResult<CatalogSyncReport> {
        let key = catalog_sync_key(store_id);
        let since = self.db.metadata().get_timestamp(&key).await?;

        let response = match self.client.fetch_catalog(store_id, since).await {
            Ok(response) => {
                self.state.record_reachable().await;
                response
            }
            Err(err) => {
                warn!(store_id = %store_id, error = %err, "Catalog fetch failed");
                if matches!(err, SyncError::ConnectionFailed(_) | SyncError::Timeout(_)) {
                    self.state.record_unreachable(err.to_string()).await;
                } else {
                    self.state.record_error(err.to_string()).await;
                }
                return Err(err);
            }
        };

        let now = self.clock.now();
        let products: Vec<CachedProduct> = response
            .products
            .into_iter()
            .map(|product| product.into_cached(self.terminal_id.as_deref(), now))
            .collect();
        let updated = self.db.products().upsert_many(&products).await?;

        let watermark = response.server_time.unwrap_or(now);
        self.db.metadata().set_timestamp(&key, watermark, now).await?;

        info!(store_id = %store_id, updated, watermark = %watermark, "Catalog synced");
        Ok(CatalogSyncReport {
            store_id: store_id.to_string(),
            since,
            updated,
            watermark,
        })
    }

    // =========================================================================
    // Operator Actions
    // =========================================================================

    /// Supervisor sign-off on a conflict.
    pub async fn acknowledge_conflict(
        &self,
        transaction_id: &str,
        supervisor_id: &str,
    ) -> SyncResult<PendingTransaction> {
        let transaction = self
            .db
            .transactions()
            .acknowledge_conflict(transaction_id, supervisor_id, self.clock.now())
            .await?;
        Ok(transaction)
    }

    /// Failed transactions out of attempts, and unacknowledged conflicts.
    pub async fn needing_attention(&self) -> SyncResult<Vec<PendingTransaction>> {
        Ok(self
            .db
            .transactions()
            .list_needing_attention(self.settings.max_attempts)
            .await?)
    }

    /// Deletes `synced` transactions and completed outbox entries older
    /// than `days`.
    pub async fn run_retention_sweep(&self, days: i64) -> SyncResult<RetentionReport> {
        if days < 1 {
            return Err(SyncError::InvalidConfig(format!(
                "retention must be at least 1 day, got {days}"
            )));
        }

        let cutoff = self.clock.now().minus_days(days);
        let report = RetentionReport {
            transactions_purged: self.db.transactions().purge_synced_older_than(cutoff).await?,
            outbox_entries_purged: self
                .db
                .sync_queue()
                .cleanup_completed_older_than(cutoff)
                .await?,
        };

        info!(
            days,
            transactions = report.transactions_purged,
            outbox = report.outbox_entries_purged,
            "Retention sweep finished"
        );
        Ok(report)
    }
}

/// A verdict for a transaction that vanished or was finalized elsewhere is
/// logged and skipped.
fn skip_stale<T>(id: &str, result: DbResult<T>) -> SyncResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e @ (DbError::NotFound { .. } | DbError::InvalidState { .. })) => {
            warn!(id = %id, error = %e, "Skipping verdict for stale transaction");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
