//! # Sync Agent
//!
//! Optional background driver for the orchestrator. The orchestrator works
//! without it; hosts that want hands-off sync spawn one.
//!
//! ## Agent Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent (tokio task)                           │
//! │                                                                         │
//! │   tokio::select! {                                                      │
//! │                                                                         │
//! │     sleep_until(next_sync) ──► sync_pending()                           │
//! │                                  │                                      │
//! │                                  ├─ every batch failed at request level │
//! │                                  │     next_sync = now + backoff        │
//! │                                  └─ otherwise                           │
//! │                                        backoff.reset()                  │
//! │                                        next_sync = now + poll_interval  │
//! │                                                                         │
//! │     catalog.tick()   ──► sync_catalog(store_id)                         │
//! │     retention.tick() ──► run_retention_sweep(retention_days)            │
//! │     shutdown_rx      ──► break                                          │
//! │   }                                                                     │
//! │                                                                         │
//! │  EVENTS (to the host):                                                  │
//! │  ─────────────────────                                                  │
//! │  emit_status   - SyncStatus after every cycle                           │
//! │  emit_progress - SyncReport of a cycle that reached the server          │
//! │  emit_error    - message + whether retrying may help                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{SyncOrchestrator, SyncReport};
use crate::state::{SyncState, SyncStatus};

/// How often old synced transactions are swept.
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives sync events (implemented by the host UI integration).
pub trait SyncEventEmitter: Send + Sync {
    /// Emits the sync status after a cycle.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits the outcome of a cycle that reached the server.
    fn emit_progress(&self, report: &SyncReport);

    /// Emits a sync error.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _report: &SyncReport) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

/// Writes events to the log. Used by the daemon, which has no UI.
pub struct TracingEmitter;

impl SyncEventEmitter for TracingEmitter {
    fn emit_status(&self, status: &SyncStatus) {
        debug!(
            online = status.online,
            pending = status.pending_count,
            failed = status.failed_count,
            conflicts = status.conflict_count,
            "Sync status"
        );
    }

    fn emit_progress(&self, report: &SyncReport) {
        if report.attempted > 0 {
            info!(
                synced = report.synced,
                conflicts = report.conflicts,
                failed = report.failed,
                "Sync progress"
            );
        }
    }

    fn emit_error(&self, message: &str, retryable: bool) {
        warn!(retryable, "Sync error: {}", message);
    }
}

// =============================================================================
// Pacing
// =============================================================================

/// Decides how long to wait before the next cycle.
struct Pacer {
    backoff: ExponentialBackoff,
    poll_interval: Duration,
    max_backoff: Duration,
}

impl Pacer {
    fn new(settings: &SyncSettings) -> Self {
        let mut backoff = ExponentialBackoff {
            initial_interval: settings.initial_backoff(),
            max_interval: settings.max_backoff(),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();

        Pacer {
            backoff,
            poll_interval: settings.poll_interval(),
            max_backoff: settings.max_backoff(),
        }
    }

    fn after_cycle(&mut self, outcome: &SyncResult<SyncReport>) -> Duration {
        match outcome {
            Ok(report) if report.all_batches_failed() => {
                self.backoff.next_backoff().unwrap_or(self.max_backoff)
            }
            Ok(_) => {
                self.backoff.reset();
                self.poll_interval
            }
            // Local store failures are not helped by backing off.
            Err(_) => self.poll_interval,
        }
    }
}

// =============================================================================
// Sync Agent
// =============================================================================

pub struct SyncAgent {
    orchestrator: Arc<SyncOrchestrator>,
    store_id: String,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl SyncAgent {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, store_id: impl Into<String>) -> Self {
        Self::with_emitter(orchestrator, store_id, Arc::new(NoOpEmitter))
    }

    pub fn with_emitter(
        orchestrator: Arc<SyncOrchestrator>,
        store_id: impl Into<String>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        SyncAgent {
            orchestrator,
            store_id: store_id.into(),
            emitter,
        }
    }

    /// Starts the agent loop on the current runtime.
    pub fn spawn(self) -> SyncAgentHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let state = self.orchestrator.state();
        let task = tokio::spawn(self.run(shutdown_rx));

        SyncAgentHandle {
            shutdown_tx,
            state,
            task,
        }
    }

    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let settings = self.orchestrator.settings().clone();
        info!(
            store_id = %self.store_id,
            poll_secs = settings.poll_interval_secs,
            catalog_secs = settings.catalog_interval_secs,
            "Sync agent started"
        );

        let mut pacer = Pacer::new(&settings);
        let mut next_sync = Instant::now();

        let mut catalog = tokio::time::interval(settings.catalog_interval());
        catalog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut retention = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        retention.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_sync) => {
                    let outcome = self.orchestrator.sync_pending().await;
                    self.report(&outcome);

                    let delay = pacer.after_cycle(&outcome);
                    debug!(?delay, "Next sync cycle scheduled");
                    next_sync = Instant::now() + delay;

                    self.emitter.emit_status(&self.orchestrator.status().await);
                }

                _ = catalog.tick() => {
                    if let Err(e) = self.orchestrator.sync_catalog(&self.store_id).await {
                        self.emitter.emit_error(&e.to_string(), e.is_retryable());
                    }
                }

                _ = retention.tick() => {
                    if let Err(e) = self.orchestrator.run_retention_sweep(settings.retention_days).await {
                        self.emitter.emit_error(&e.to_string(), false);
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Sync agent received shutdown");
                    break;
                }
            }
        }

        info!("Sync agent stopped");
    }

    fn report(&self, outcome: &SyncResult<SyncReport>) {
        match outcome {
            Ok(report) if report.skipped => {}
            Ok(report) if report.all_batches_failed() => {
                self.emitter
                    .emit_error("Ledger server unreachable; sales kept for retry", true);
            }
            Ok(report) => self.emitter.emit_progress(report),
            Err(e) => self.emitter.emit_error(&e.to_string(), e.is_retryable()),
        }
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Handle for controlling a running agent from outside.
pub struct SyncAgentHandle {
    shutdown_tx: mpsc::Sender<()>,
    state: SyncState,
    task: JoinHandle<()>,
}

impl SyncAgentHandle {
    pub async fn status(&self) -> SyncStatus {
        self.state.snapshot().await
    }

    /// Signals the agent to stop and waits for it. A cycle in progress is
    /// finished first.
    pub async fn shutdown(self) -> SyncResult<()> {
        // The loop may already be gone; joining reports how it ended.
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| SyncError::Internal(format!("Sync agent task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SyncClient;
    use crate::clock::SystemClock;
    use crate::protocol::{CatalogResponse, SubmitBatchRequest, SubmitBatchResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tern_core::{ConflictPolicy, Timestamp};
    use tern_db::{Database, DbConfig};

    #[derive(Default)]
    struct EmptyServer {
        catalog_calls: AtomicUsize,
    }

    #[async_trait]
    impl SyncClient for EmptyServer {
        async fn submit_batch(
            &self,
            _request: &SubmitBatchRequest,
        ) -> SyncResult<SubmitBatchResponse> {
            Ok(SubmitBatchResponse { results: vec![] })
        }

        async fn fetch_catalog(
            &self,
            _store_id: &str,
            _since: Option<Timestamp>,
        ) -> SyncResult<CatalogResponse> {
            self.catalog_calls.fetch_add(1, Ordering::SeqCst);
            Ok(CatalogResponse {
                products: vec![],
                server_time: None,
            })
        }
    }

    fn report(batches: usize, failed_batches: usize) -> SyncReport {
        SyncReport {
            batches,
            failed_batches,
            ..Default::default()
        }
    }

    #[test]
    fn test_pacer_backs_off_only_when_unreachable() {
        let settings = SyncSettings {
            poll_interval_secs: 30,
            initial_backoff_ms: 1_000,
            max_backoff_secs: 8,
            ..SyncSettings::default()
        };
        let mut pacer = Pacer::new(&settings);

        assert_eq!(pacer.after_cycle(&Ok(report(0, 0))), Duration::from_secs(30));
        assert_eq!(pacer.after_cycle(&Ok(report(2, 1))), Duration::from_secs(30));

        for _ in 0..6 {
            let delay = pacer.after_cycle(&Ok(report(1, 1)));
            assert!(delay > Duration::ZERO);
            // Jitter may stretch the ceiling by the randomization factor.
            assert!(delay <= Duration::from_secs(12));
        }

        let local_failure: SyncResult<SyncReport> = Err(SyncError::Internal("disk".into()));
        assert_eq!(pacer.after_cycle(&local_failure), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_agent_runs_and_shuts_down() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let server = Arc::new(EmptyServer::default());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            db,
            server.clone(),
            Arc::new(SystemClock),
            SyncSettings::default(),
            ConflictPolicy::default(),
        ));

        let handle = SyncAgent::new(orchestrator, "store-1").spawn();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.status().await.last_sync.is_none()
            || server.catalog_calls.load(Ordering::SeqCst) == 0
        {
            assert!(Instant::now() < deadline, "agent never completed a cycle");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handle.shutdown().await.unwrap();
        // Both timers are long; only the immediate first ticks ran.
        assert_eq!(server.catalog_calls.load(Ordering::SeqCst), 1);
    }
}
