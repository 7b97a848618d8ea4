//! Monitor errors.

use autostudy_config::ConfigError;
use autostudy_logstore::LogStoreError;
use thiserror::Error;

/// Monitor error types.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Failed to sample the host.
    #[error("Failed to collect metrics: {0}")]
    MetricsCollection(String),

    /// A detection pass did not complete.
    #[error("Detection failed: {0}")]
    Detection(String),

    /// A notification channel failed to deliver.
    #[error("Alert delivery failed via {channel}: {message}")]
    AlertDelivery { channel: String, message: String },

    /// Unknown or already resolved alert id.
    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    /// Rule rejected at construction.
    #[error("Invalid alert rule: {0}")]
    InvalidRule(String),

    /// Channel selected by a rule but missing its settings.
    #[error("Alert channel not configured: {0}")]
    ChannelNotConfigured(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Log store error: {0}")]
    LogStore(#[from] LogStoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl MonitorError {
    pub(crate) fn delivery(channel: &str, message: impl Into<String>) -> Self {
        Self::AlertDelivery {
            channel: channel.to_string(),
            message: message.into(),
        }
    }
}
