//! Alerting configuration types (detection loop and rule definitions).

use serde::{Deserialize, Serialize};

use super::default_true;

/// Detection loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    /// Whether the alert manager runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between two detection passes.
    #[serde(default = "default_detection_interval")]
    pub detection_interval_secs: u64,

    /// Seconds to back off after a failed detection pass.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    /// Number of recent log entries handed to the detector.
    #[serde(default = "default_detection_window")]
    pub detection_window: usize,

    /// Install the built-in pattern rules.
    #[serde(default = "default_true")]
    pub default_rules: bool,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            detection_interval_secs: default_detection_interval(),
            error_backoff_secs: default_error_backoff(),
            detection_window: default_detection_window(),
            default_rules: default_true(),
        }
    }
}

fn default_detection_interval() -> u64 {
    5
}

fn default_error_backoff() -> u64 {
    10
}

fn default_detection_window() -> usize {
    100
}

/// An alert rule as written in the config file.
///
/// Field values are kept as plain strings here; they are parsed into typed
/// rules by the monitor crate when the rule is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Unique rule ID.
    pub id: String,

    /// Display name (defaults to the ID).
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: String,

    /// Trigger condition.
    pub condition: ConditionConfig,

    /// One of `low`, `medium`, `high`, `critical`.
    #[serde(default = "default_severity")]
    pub severity: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum seconds between two new alerts for this rule.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Maximum new alerts per wall-clock hour.
    #[serde(default = "default_max_per_hour")]
    pub max_per_hour: u32,

    /// Notification channels: `console`, `file`, `email`, `webhook`.
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,

    /// Message template with `{field}` placeholders filled from detection details.
    #[serde(default)]
    pub message_template: Option<String>,
}

/// Rule trigger condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionConfig {
    /// Fires when the named anomaly pattern is detected.
    Pattern { pattern: String },

    /// Fires when a metric stays past a threshold for a duration.
    MetricThreshold {
        metric: String,
        #[serde(default = "default_comparator")]
        comparator: String,
        threshold: f64,
        #[serde(default)]
        duration_secs: u64,
    },
}

fn default_severity() -> String {
    "medium".to_string()
}

fn default_cooldown() -> u64 {
    300
}

fn default_max_per_hour() -> u32 {
    10
}

fn default_channels() -> Vec<String> {
    vec!["console".to_string(), "file".to_string()]
}

fn default_comparator() -> String {
    ">".to_string()
}
