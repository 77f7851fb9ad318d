//! Configuration loading for sync-engine.
//!
//! Configuration is loaded from a TOML file (default: `pairlink.toml`).

use serde::Deserialize;
use std::path::PathBuf;
use sync_core::RetryPolicy;

/// Root configuration for the sync engine.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    /// Retry/backoff limits for failed external writes.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Scheduler pass configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// What gets synchronized.
    #[serde(default)]
    pub sync: SyncOptions,
    /// Record store configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Retry/backoff limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Base delay for the first retry, in seconds (default: 5).
    #[serde(default = "default_retry_base")]
    pub base_secs: u64,
    /// Cap on a single retry delay, in seconds (default: 900).
    #[serde(default = "default_retry_max_interval")]
    pub max_interval_secs: u64,
    /// Attempts before the record is parked for manual intervention
    /// (default: 3).
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
}

impl RetryConfig {
    /// The equivalent pure-core policy.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_secs: self.base_secs,
            max_interval_secs: self.max_interval_secs,
            max_attempts: self.max_attempts,
        }
    }
}

/// Scheduler pass configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between retry passes (default: 60).
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    /// Seconds between full reconciliation sweeps (default: 3600).
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Age in seconds after which an in-flight `pending`/`resolved`
    /// record is considered orphaned and re-driven (default: 300).
    #[serde(default = "default_stuck_after")]
    pub stuck_after_secs: u64,
    /// Enable the background scheduler task (default: true).
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
}

/// What gets synchronized.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncOptions {
    /// Request status transitions on the target; rejection is a partial,
    /// non-fatal warning (default: true).
    #[serde(default = "default_status_transitions")]
    pub status_transitions: bool,
    /// Mirror the assignee field. Off by default: accounts rarely exist
    /// on both instances (default: false).
    #[serde(default)]
    pub assignee: bool,
    /// Mirror comments (default: true).
    #[serde(default = "default_sync_comments")]
    pub comments: bool,
}

/// Record store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

// Default value functions
fn default_retry_base() -> u64 {
    5
}

fn default_retry_max_interval() -> u64 {
    900 // 15 minutes
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_interval() -> u64 {
    60
}

fn default_reconcile_interval() -> u64 {
    3600 // 1 hour
}

fn default_stuck_after() -> u64 {
    300 // 5 minutes
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_status_transitions() -> bool {
    true
}

fn default_sync_comments() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("pairlink.db")
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_secs: default_retry_base(),
            max_interval_secs: default_retry_max_interval(),
            max_attempts: default_retry_max_attempts(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_interval(),
            reconcile_interval_secs: default_reconcile_interval(),
            stuck_after_secs: default_stuck_after(),
            enabled: default_scheduler_enabled(),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            status_transitions: default_status_transitions(),
            assignee: false,
            comments: default_sync_comments(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
