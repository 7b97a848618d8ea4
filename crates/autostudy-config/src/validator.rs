//! Configuration validation.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::schema::{ConditionConfig, Config};

const PATTERNS: &[&str] = &[
    "error_spike",
    "performance_degradation",
    "resource_exhaustion",
    "suspicious_activity",
    "service_unavailable",
];

const METRICS: &[&str] = &[
    "cpu_percent",
    "memory_percent",
    "disk_percent",
    "network_sent",
    "network_recv",
    "active_threads",
    "running_tasks",
    "pending_tasks",
    "failed_tasks",
];

const COMPARATORS: &[&str] = &[">", "<", ">=", "<=", "==", "!="];

const SEVERITIES: &[&str] = &["low", "medium", "high", "critical"];

const CHANNELS: &[&str] = &["console", "file", "email", "webhook"];

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Fail with the first error as [`ConfigError::InvalidValue`]; warnings pass.
    pub fn into_result(self) -> Result<Self, ConfigError> {
        let Some(first) = self.errors.first() else {
            return Ok(self);
        };
        let message = match self.errors.len() {
            1 => first.message.clone(),
            n => format!("{} (and {} more error(s))", first.message, n - 1),
        };
        Err(ConfigError::InvalidValue {
            field: first.path.clone(),
            message,
        })
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_logging(config, &mut result);
        Self::validate_metrics(config, &mut result);
        Self::validate_alerting(config, &mut result);
        Self::validate_notifications(config, &mut result);
        Self::validate_rules(config, &mut result);

        Ok(result)
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        if config.logging.capacity == 0 {
            result.add_error(ValidationError::new(
                "logging.capacity",
                "capacity must be greater than 0",
            ));
        }

        if config.logging.max_file_size_mb == 0 {
            result.add_error(ValidationError::new(
                "logging.max_file_size_mb",
                "max_file_size_mb must be greater than 0",
            ));
        }

        if config.logging.retention_days == 0 {
            result.add_warning(ValidationWarning::new(
                "logging.retention_days",
                "retention_days is 0, rotated files are deleted immediately",
            ));
        }
    }

    fn validate_metrics(config: &Config, result: &mut ValidationResult) {
        if config.metrics.interval_ms == 0 {
            result.add_error(ValidationError::new(
                "metrics.interval_ms",
                "interval_ms must be greater than 0",
            ));
        } else if config.metrics.interval_ms < 100 {
            result.add_warning(ValidationWarning::new(
                "metrics.interval_ms",
                "interval_ms below 100 samples the host very aggressively",
            ));
        }

        if config.metrics.history_size == 0 {
            result.add_error(ValidationError::new(
                "metrics.history_size",
                "history_size must be greater than 0",
            ));
        }
    }

    fn validate_alerting(config: &Config, result: &mut ValidationResult) {
        if config.alerting.detection_interval_secs == 0 {
            result.add_error(ValidationError::new(
                "alerting.detection_interval_secs",
                "detection_interval_secs must be greater than 0",
            ));
        }

        if config.alerting.detection_window > config.logging.capacity {
            result.add_warning(ValidationWarning::new(
                "alerting.detection_window",
                format!(
                    "detection_window ({}) exceeds logging.capacity ({}), only {} entries are available",
                    config.alerting.detection_window,
                    config.logging.capacity,
                    config.logging.capacity
                ),
            ));
        }
    }

    fn validate_notifications(config: &Config, result: &mut ValidationResult) {
        for (i, url) in config.notifications.webhook_urls.iter().enumerate() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                result.add_error(ValidationError::new(
                    format!("notifications.webhook_urls[{}]", i),
                    "webhook URL must start with http:// or https://",
                ));
            }
        }

        if let Some(ref email) = config.notifications.email {
            if email.smtp_host.is_empty() {
                result.add_error(ValidationError::new(
                    "notifications.email.smtp_host",
                    "smtp_host cannot be empty",
                ));
            }
            if email.sender().is_none() {
                result.add_warning(ValidationWarning::new(
                    "notifications.email.from",
                    "neither from nor username is set, email delivery will fail",
                ));
            }
        }
    }

    fn validate_rules(config: &Config, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        let email_ready = config
            .notifications
            .email
            .as_ref()
            .is_some_and(|e| !e.recipients.is_empty());

        for rule in &config.rules {
            let path = format!("rules.{}", rule.id);

            if rule.id.is_empty() {
                result.add_error(ValidationError::new("rules", "rule id cannot be empty"));
            }
            if !seen.insert(rule.id.as_str()) {
                result.add_error(ValidationError::new(
                    &path,
                    format!("duplicate rule id '{}'", rule.id),
                ));
            }

            if !SEVERITIES.contains(&rule.severity.to_lowercase().as_str()) {
                result.add_error(ValidationError::new(
                    format!("{}.severity", path),
                    format!(
                        "Unknown severity '{}', valid values: {:?}",
                        rule.severity, SEVERITIES
                    ),
                ));
            }

            for channel in &rule.channels {
                if !CHANNELS.contains(&channel.to_lowercase().as_str()) {
                    result.add_error(ValidationError::new(
                        format!("{}.channels", path),
                        format!("Unknown channel '{}', valid values: {:?}", channel, CHANNELS),
                    ));
                } else if channel.eq_ignore_ascii_case("email") && !email_ready {
                    result.add_warning(ValidationWarning::new(
                        format!("{}.channels", path),
                        "email channel selected but no recipients are configured",
                    ));
                }
            }

            match &rule.condition {
                ConditionConfig::Pattern { pattern } => {
                    if !PATTERNS.contains(&pattern.as_str()) {
                        result.add_error(ValidationError::new(
                            format!("{}.condition.pattern", path),
                            format!("Unknown pattern '{}', valid values: {:?}", pattern, PATTERNS),
                        ));
                    }
                }
                ConditionConfig::MetricThreshold {
                    metric, comparator, ..
                } => {
                    if !METRICS.contains(&metric.as_str()) {
                        result.add_error(ValidationError::new(
                            format!("{}.condition.metric", path),
                            format!("Unknown metric '{}', valid values: {:?}", metric, METRICS),
                        ));
                    }
                    if !COMPARATORS.contains(&comparator.as_str()) {
                        result.add_error(ValidationError::new(
                            format!("{}.condition.comparator", path),
                            format!(
                                "Unknown comparator '{}', valid values: {:?}",
                                comparator, COMPARATORS
                            ),
                        ));
                    }
                }
            }

            if rule.max_per_hour == 0 && rule.enabled {
                result.add_warning(ValidationWarning::new(
                    format!("{}.max_per_hour", path),
                    "max_per_hour is 0, this rule can never raise an alert",
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
