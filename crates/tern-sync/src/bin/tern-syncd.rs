//! # tern-syncd
//!
//! Headless sync daemon for a terminal: opens the durable store, runs the
//! sync agent against the ledger server and stops cleanly on Ctrl-C.
//!
//! ```text
//! tern-syncd [CONFIG_PATH]
//!
//! RUST_LOG=debug tern-syncd /etc/tern/sync.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tern_db::Database;
use tern_sync::{
    HttpSyncClient, SyncAgent, SyncConfig, SyncError, SyncOrchestrator, SyncResult, SystemClock,
    TracingEmitter,
};

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        error!(error = %e, "tern-syncd exited with an error");
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides the default.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tern=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run() -> SyncResult<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = SyncConfig::load(config_path)?;

    let database_path = config.database_path();
    if let Some(parent) = database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Internal(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }
    }

    info!(
        terminal_id = %config.terminal_id(),
        store_id = %config.store_id(),
        server = %config.server.base_url,
        database = %database_path.display(),
        "Starting tern-syncd"
    );

    let db = Database::new(config.db_config()).await?;
    let client = HttpSyncClient::new(config.server_url()?, &config.server)?;

    let orchestrator = Arc::new(
        SyncOrchestrator::new(
            db.clone(),
            Arc::new(client),
            Arc::new(SystemClock),
            config.sync.clone(),
            config.conflict_policy(),
        )
        .with_terminal_id(config.terminal_id()),
    );

    let handle =
        SyncAgent::with_emitter(orchestrator, config.store_id(), Arc::new(TracingEmitter)).spawn();

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| SyncError::Internal(format!("Failed to listen for Ctrl-C: {e}")))?;

    info!("Shutdown requested");
    handle.shutdown().await?;
    db.close().await;

    info!("tern-syncd stopped");
    Ok(())
}
