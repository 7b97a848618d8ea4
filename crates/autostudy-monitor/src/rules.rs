//! Alert rules.

use std::fmt;
use std::str::FromStr;

use autostudy_config::{ConditionConfig, RuleConfig};
use serde::{Deserialize, Serialize};

use crate::detector::AnomalyPattern;
use crate::error::MonitorError;

/// Alert severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub const ALL: [AlertSeverity; 4] = [
        AlertSeverity::Low,
        AlertSeverity::Medium,
        AlertSeverity::High,
        AlertSeverity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "LOW",
            AlertSeverity::Medium => "MEDIUM",
            AlertSeverity::High => "HIGH",
            AlertSeverity::Critical => "CRITICAL",
        }
    }

    /// Icon shown on console panels.
    pub fn icon(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "\u{2139}\u{fe0f}",
            AlertSeverity::Medium => "\u{26a0}\u{fe0f}",
            AlertSeverity::High => "\u{1f6a8}",
            AlertSeverity::Critical => "\u{1f525}",
        }
    }

    /// ANSI SGR sequence for console panels.
    pub fn ansi_color(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "\x1b[32m",
            AlertSeverity::Medium => "\x1b[33m",
            AlertSeverity::High => "\x1b[31m",
            AlertSeverity::Critical => "\x1b[1;31m",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertSeverity::ALL
            .into_iter()
            .find(|sev| sev.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| MonitorError::InvalidRule(format!("unknown severity '{}'", s)))
    }
}

/// Notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Console,
    File,
    Email,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Console => "console",
            ChannelKind::File => "file",
            ChannelKind::Email => "email",
            ChannelKind::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" => Ok(ChannelKind::Console),
            "file" => Ok(ChannelKind::File),
            "email" => Ok(ChannelKind::Email),
            "webhook" => Ok(ChannelKind::Webhook),
            _ => Err(MonitorError::InvalidRule(format!("unknown channel '{}'", s))),
        }
    }
}

/// Metric a threshold rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    CpuPercent,
    MemoryPercent,
    DiskPercent,
    NetworkSent,
    NetworkRecv,
    ActiveThreads,
    RunningTasks,
    PendingTasks,
    FailedTasks,
}

impl MetricName {
    pub const ALL: [MetricName; 9] = [
        MetricName::CpuPercent,
        MetricName::MemoryPercent,
        MetricName::DiskPercent,
        MetricName::NetworkSent,
        MetricName::NetworkRecv,
        MetricName::ActiveThreads,
        MetricName::RunningTasks,
        MetricName::PendingTasks,
        MetricName::FailedTasks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::CpuPercent => "cpu_percent",
            MetricName::MemoryPercent => "memory_percent",
            MetricName::DiskPercent => "disk_percent",
            MetricName::NetworkSent => "network_sent",
            MetricName::NetworkRecv => "network_recv",
            MetricName::ActiveThreads => "active_threads",
            MetricName::RunningTasks => "running_tasks",
            MetricName::PendingTasks => "pending_tasks",
            MetricName::FailedTasks => "failed_tasks",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricName::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| MonitorError::InvalidRule(format!("unknown metric '{}'", s)))
    }
}

/// Threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Lt => "<",
            Comparator::Ge => ">=",
            Comparator::Le => "<=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }

    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Lt => value < threshold,
            Comparator::Ge => value >= threshold,
            Comparator::Le => value <= threshold,
            Comparator::Eq => (value - threshold).abs() < f64::EPSILON,
            Comparator::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparator {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(Comparator::Gt),
            "<" => Ok(Comparator::Lt),
            ">=" => Ok(Comparator::Ge),
            "<=" => Ok(Comparator::Le),
            "==" => Ok(Comparator::Eq),
            "!=" => Ok(Comparator::Ne),
            _ => Err(MonitorError::InvalidRule(format!("unknown comparator '{}'", s))),
        }
    }
}

/// What makes a rule fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertCondition {
    /// Metric compared against a threshold, held for `duration_secs`.
    MetricThreshold {
        metric: MetricName,
        comparator: Comparator,
        threshold: f64,
        duration_secs: u64,
    },
    /// A detected anomaly pattern.
    Pattern { pattern: AnomalyPattern },
}

/// An alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub condition: AlertCondition,
    pub severity: AlertSeverity,
    pub enabled: bool,
    pub cooldown_secs: u64,
    pub max_per_hour: u32,
    pub channels: Vec<ChannelKind>,
    /// Message with `{field}` placeholders filled from detection details.
    pub message_template: Option<String>,
}

const DEFAULT_COOLDOWN_SECS: u64 = 300;
const DEFAULT_MAX_PER_HOUR: u32 = 10;

impl AlertRule {
    fn with_condition(
        id: impl Into<String>,
        name: impl Into<String>,
        condition: AlertCondition,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            condition,
            severity,
            enabled: true,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            max_per_hour: DEFAULT_MAX_PER_HOUR,
            channels: vec![ChannelKind::Console, ChannelKind::File],
            message_template: None,
        }
    }

    /// A rule fired by a detected anomaly pattern.
    pub fn pattern(
        id: impl Into<String>,
        name: impl Into<String>,
        pattern: AnomalyPattern,
        severity: AlertSeverity,
    ) -> Self {
        Self::with_condition(id, name, AlertCondition::Pattern { pattern }, severity)
    }

    /// A rule fired by a metric threshold held for `duration_secs`.
    pub fn metric_threshold(
        id: impl Into<String>,
        name: impl Into<String>,
        metric: MetricName,
        comparator: Comparator,
        threshold: f64,
        duration_secs: u64,
    ) -> Self {
        Self::with_condition(
            id,
            name,
            AlertCondition::MetricThreshold {
                metric,
                comparator,
                threshold,
                duration_secs,
            },
            AlertSeverity::Medium,
        )
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_channels(mut self, channels: impl Into<Vec<ChannelKind>>) -> Self {
        self.channels = channels.into();
        self
    }

    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn with_max_per_hour(mut self, max: u32) -> Self {
        self.max_per_hour = max;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.message_template = Some(template.into());
        self
    }

    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The pattern this rule reacts to, if it is a pattern rule.
    pub fn pattern_kind(&self) -> Option<AnomalyPattern> {
        match self.condition {
            AlertCondition::Pattern { pattern } => Some(pattern),
            AlertCondition::MetricThreshold { .. } => None,
        }
    }

    pub fn is_threshold(&self) -> bool {
        matches!(self.condition, AlertCondition::MetricThreshold { .. })
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.id.trim().is_empty() {
            return Err(MonitorError::InvalidRule("rule id cannot be empty".to_string()));
        }
        if let AlertCondition::MetricThreshold { threshold, .. } = self.condition {
            if !threshold.is_finite() {
                return Err(MonitorError::InvalidRule(format!(
                    "rule '{}' has a non-finite threshold",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Build and validate a rule from its configuration.
    pub fn from_config(config: &RuleConfig) -> Result<Self, MonitorError> {
        let condition = match &config.condition {
            ConditionConfig::Pattern { pattern } => AlertCondition::Pattern {
                pattern: pattern.parse()?,
            },
            ConditionConfig::MetricThreshold {
                metric,
                comparator,
                threshold,
                duration_secs,
            } => AlertCondition::MetricThreshold {
                metric: metric.parse()?,
                comparator: comparator.parse()?,
                threshold: *threshold,
                duration_secs: *duration_secs,
            },
        };

        let channels = config
            .channels
            .iter()
            .map(|c| c.parse())
            .collect::<Result<Vec<ChannelKind>, _>>()?;

        let rule = Self {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            description: config.description.clone(),
            condition,
            severity: config.severity.parse()?,
            enabled: config.enabled,
            cooldown_secs: config.cooldown_secs,
            max_per_hour: config.max_per_hour,
            channels,
            message_template: config.message_template.clone(),
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Alert message for a detection.
    ///
    /// With a template, `{key}` is replaced by the detail field `key`; unknown
    /// placeholders are left in place.
    pub fn render_message(&self, details: &serde_json::Value) -> String {
        match &self.message_template {
            Some(template) => fill_template(template, details),
            None if self.description.is_empty() => format!("{}: {}", self.name, details),
            None => format!("{}: {}", self.description, details),
        }
    }
}

fn fill_template(template: &str, details: &serde_json::Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match details.get(key) {
                    Some(serde_json::Value::String(s)) => out.push_str(s),
                    Some(value) => out.push_str(&value.to_string()),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Built-in pattern rules.
pub fn default_pattern_rules() -> Vec<AlertRule> {
    use ChannelKind::{Console, Email, File};

    vec![
        AlertRule::pattern(
            "error_spike",
            "Error spike",
            AnomalyPattern::ErrorSpike,
            AlertSeverity::High,
        )
        .with_description("Error count surged in a short window"),
        AlertRule::pattern(
            "performance_degradation",
            "Performance degradation",
            AnomalyPattern::PerformanceDegradation,
            AlertSeverity::Medium,
        )
        .with_description("Operation durations are noticeably slower"),
        AlertRule::pattern(
            "resource_exhaustion",
            "Resource exhaustion",
            AnomalyPattern::ResourceExhaustion,
            AlertSeverity::Critical,
        )
        .with_description("Host resource usage is critically high")
        .with_channels([Console, File, Email]),
        AlertRule::pattern(
            "security_alert",
            "Security alert",
            AnomalyPattern::SuspiciousActivity,
            AlertSeverity::High,
        )
        .with_description("Suspicious security activity detected")
        .with_channels([Console, File, Email]),
        AlertRule::pattern(
            "service_unavailable",
            "Service unavailable",
            AnomalyPattern::ServiceUnavailable,
            AlertSeverity::Critical,
        )
        .with_description("A required service cannot be reached")
        .with_channels([Console, File, Email]),
    ]
}

/// Built-in host threshold rules.
pub fn default_threshold_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::metric_threshold(
            "high_cpu",
            "High CPU usage",
            MetricName::CpuPercent,
            Comparator::Gt,
            80.0,
            30,
        ),
        AlertRule::metric_threshold(
            "high_memory",
            "High memory usage",
            MetricName::MemoryPercent,
            Comparator::Gt,
            90.0,
            30,
        ),
        AlertRule::metric_threshold(
            "low_disk_space",
            "Low disk space",
            MetricName::DiskPercent,
            Comparator::Gt,
            95.0,
            60,
        ),
        AlertRule::metric_threshold(
            "too_many_threads",
            "Too many threads",
            MetricName::ActiveThreads,
            Comparator::Gt,
            100.0,
            60,
        ),
    ]
}

#[cfg(test)]
#[path = "rules_tests.rs"]
mod tests;
