//! # Sync Configuration
//!
//! Configuration management for the terminal's sync daemon.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TERN_TERMINAL_ID=t-01                                              │
//! │     TERN_SERVER_URL=https://ledger.example.com                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tern-pos/sync.toml (Linux)                               │
//! │     ~/Library/Application Support/com.tern.pos/sync.toml (macOS)       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     generated terminal id, localhost server, batch of 10               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [terminal]
//! id = "t-01"
//! name = "Register 1"
//! database_path = "/var/lib/tern/terminal.db"
//!
//! [store]
//! id = "store-001"
//! name = "Downtown Branch"
//!
//! [server]
//! base_url = "https://ledger.example.com"
//! request_timeout_secs = 30
//!
//! [sync]
//! batch_size = 10
//! max_attempts = 5
//! poll_interval_secs = 30
//!
//! [conflict]
//! auto_accept_refund_below_cents = 500
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use tern_core::{
    new_id, ConflictPolicy, Money, DEFAULT_AUTO_ACCEPT_REFUND_BELOW_CENTS, MAX_SYNC_ATTEMPTS,
    SYNC_BATCH_SIZE,
};
use tern_db::DbConfig;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Terminal Configuration
// =============================================================================

/// Configuration for this terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Terminal identifier. Its last two characters appear in local
    /// receipt numbers.
    pub id: String,

    /// Human-readable terminal name (e.g., "Register 1").
    #[serde(default = "default_terminal_name")]
    pub name: String,

    /// SQLite file of the durable store.
    /// Defaults to `terminal.db` in the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_terminal_name() -> String {
    "POS Terminal".to_string()
}

impl Default for TerminalConfig {
    fn default() -> Self {
        TerminalConfig {
            id: new_id(),
            name: default_terminal_name(),
            database_path: None,
        }
    }
}

// =============================================================================
// Store Configuration
// =============================================================================

/// Configuration for the store this terminal sells for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            id: "default-store".to_string(),
            name: "Default Store".to_string(),
        }
    }
}

// =============================================================================
// Server Settings
// =============================================================================

/// Where the ledger server lives and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Base URL; `/api/sync/...` paths are appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Upper bound on one whole request (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Upper bound on establishing the connection (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl ServerSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Transactions submitted per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attempts after which a failed transaction is left for an operator.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,

    /// Interval between sync cycles of the background agent (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Interval between catalog refreshes of the background agent (seconds).
    #[serde(default = "default_catalog_interval")]
    pub catalog_interval_secs: u64,

    /// First backoff after a cycle that could not reach the server (ms).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Age in days after which synced transactions are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_batch_size() -> usize {
    SYNC_BATCH_SIZE
}
fn default_max_attempts() -> i64 {
    MAX_SYNC_ATTEMPTS
}
fn default_poll_interval() -> u64 {
    30
}
fn default_catalog_interval() -> u64 {
    300
}
fn default_initial_backoff() -> u64 {
    1_000
}
fn default_max_backoff() -> u64 {
    300
}
fn default_retention_days() -> i64 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            poll_interval_secs: default_poll_interval(),
            catalog_interval_secs: default_catalog_interval(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            retention_days: default_retention_days(),
        }
    }
}

impl SyncSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn catalog_interval(&self) -> Duration {
        Duration::from_secs(self.catalog_interval_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

// =============================================================================
// Conflict Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSettings {
    /// Conflicts refunding strictly less than this, with no line emptied,
    /// are accepted without a supervisor.
    #[serde(default = "default_auto_accept")]
    pub auto_accept_refund_below_cents: i64,
}

fn default_auto_accept() -> i64 {
    DEFAULT_AUTO_ACCEPT_REFUND_BELOW_CENTS
}

impl Default for ConflictSettings {
    fn default() -> Self {
        ConflictSettings {
            auto_accept_refund_below_cents: default_auto_accept(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete configuration of the sync daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub conflict: ConflictSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated terminal ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.terminal.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("terminal.id must not be empty".into()));
        }
        if self.store.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("store.id must not be empty".into()));
        }

        self.server_url()?;

        if self.server.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }
        if self.sync.max_attempts < 1 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.sync.retention_days < 1 {
            return Err(SyncError::InvalidConfig(
                "retention_days must be at least 1".into(),
            ));
        }
        if self.conflict.auto_accept_refund_below_cents < 0 {
            return Err(SyncError::InvalidConfig(
                "auto_accept_refund_below_cents must not be negative".into(),
            ));
        }

        Ok(())
    }

    /// Applies `TERN_*` overrides. `lookup` is `std::env::var` outside tests.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("TERN_TERMINAL_ID") {
            debug!(terminal_id = %id, "Overriding terminal ID from environment");
            self.terminal.id = id;
        }

        if let Some(name) = lookup("TERN_TERMINAL_NAME") {
            self.terminal.name = name;
        }

        if let Some(path) = lookup("TERN_DATABASE_PATH") {
            self.terminal.database_path = Some(PathBuf::from(path));
        }

        if let Some(id) = lookup("TERN_STORE_ID") {
            self.store.id = id;
        }

        if let Some(url) = lookup("TERN_SERVER_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.server.base_url = url;
        }

        override_parsed(&lookup, "TERN_REQUEST_TIMEOUT_SECS", &mut self.server.request_timeout_secs);
        override_parsed(&lookup, "TERN_BATCH_SIZE", &mut self.sync.batch_size);
        override_parsed(&lookup, "TERN_MAX_ATTEMPTS", &mut self.sync.max_attempts);
        override_parsed(&lookup, "TERN_POLL_INTERVAL_SECS", &mut self.sync.poll_interval_secs);
        override_parsed(
            &lookup,
            "TERN_AUTO_ACCEPT_REFUND_BELOW_CENTS",
            &mut self.conflict.auto_accept_refund_below_cents,
        );
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tern", "pos")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    fn default_database_path() -> PathBuf {
        directories::ProjectDirs::from("com", "tern", "pos")
            .map(|dirs| dirs.data_dir().join("terminal.db"))
            .unwrap_or_else(|| PathBuf::from("terminal.db"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn terminal_id(&self) -> &str {
        &self.terminal.id
    }

    pub fn store_id(&self) -> &str {
        &self.store.id
    }

    /// The parsed server base URL. Only http and https are accepted.
    pub fn server_url(&self) -> SyncResult<Url> {
        let url = Url::parse(&self.server.base_url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(SyncError::InvalidUrl(format!(
                "Server URL must use http or https, got: {}",
                other
            ))),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.terminal
            .database_path
            .clone()
            .unwrap_or_else(Self::default_database_path)
    }

    /// Pool configuration for the durable store.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database_path())
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        ConflictPolicy::with_threshold(Money::from_cents(
            self.conflict.auto_accept_refund_below_cents,
        ))
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!(key = %key, value = %raw, "Ignoring unparsable environment override"),
        }
    }
}
