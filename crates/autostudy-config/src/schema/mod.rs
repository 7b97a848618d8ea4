//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod schema_alerting;
mod schema_notifications;

pub use schema_alerting::*;
pub use schema_notifications::*;

/// Shared default helper used by submodules.
pub(crate) fn default_true() -> bool {
    true
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub alerting: AlertingConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Alert rules added on top of (or instead of) the built-in defaults.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Structured log store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for structured log files.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    /// Number of entries kept in the in-memory window.
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,

    /// Whether entries are persisted to disk at all.
    #[serde(default = "default_true")]
    pub persist: bool,

    /// Days to keep rotated files.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Size bound of a single log file, in megabytes.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Gzip rotated files.
    #[serde(default = "default_true")]
    pub compression: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            capacity: default_log_capacity(),
            persist: default_true(),
            retention_days: default_retention_days(),
            max_file_size_mb: default_max_file_size_mb(),
            compression: default_true(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_capacity() -> usize {
    1000
}

fn default_retention_days() -> u32 {
    30
}

fn default_max_file_size_mb() -> u64 {
    100
}

/// Metrics collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Sampling interval in milliseconds.
    #[serde(default = "default_metrics_interval_ms")]
    pub interval_ms: u64,

    /// Number of samples kept in history.
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Install the built-in CPU/memory/disk/thread threshold rules.
    #[serde(default = "default_true")]
    pub default_rules: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_metrics_interval_ms(),
            history_size: default_history_size(),
            default_rules: default_true(),
        }
    }
}

fn default_metrics_interval_ms() -> u64 {
    1000
}

fn default_history_size() -> usize {
    300
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
