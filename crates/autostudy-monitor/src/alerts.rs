//! Alerts and the channel trait they are delivered through.

#[cfg(test)]
#[path = "alerts_tests.rs"]
mod tests;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MonitorError;
use crate::rules::{AlertRule, AlertSeverity, ChannelKind};

/// Alert lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert raised by a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub title: String,
    pub message: String,
    /// Detection evidence, tagged with `pattern`.
    pub details: serde_json::Value,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub occurrence_count: u32,
    pub last_occurrence: DateTime<Utc>,
}

impl Alert {
    /// A new `Active` alert for `rule`.
    pub fn new(
        alert_id: impl Into<String>,
        rule: &AlertRule,
        details: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            alert_id: alert_id.into(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            severity: rule.severity,
            status: AlertStatus::Active,
            title: format!("[{}] {}", rule.severity, rule.name),
            message: rule.render_message(&details),
            details,
            triggered_at: now,
            acknowledged_at: None,
            resolved_at: None,
            occurrence_count: 1,
            last_occurrence: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }

    /// Record another detection while the alert is still open.
    pub fn record_occurrence(&mut self, now: DateTime<Utc>) {
        self.occurrence_count = self.occurrence_count.saturating_add(1);
        self.last_occurrence = now;
    }

    /// `Active -> Acknowledged`. Returns `false` for any other status.
    pub fn acknowledge(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != AlertStatus::Active {
            return false;
        }
        self.status = AlertStatus::Acknowledged;
        self.acknowledged_at = Some(now);
        true
    }

    /// `Active | Acknowledged -> Resolved`. Returns `false` if already resolved.
    pub fn resolve(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == AlertStatus::Resolved {
            return false;
        }
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(now);
        true
    }

    /// One line of the alert notification file.
    pub fn file_record(&self) -> serde_json::Value {
        serde_json::json!({
            "timestamp": self.triggered_at,
            "alert_id": self.alert_id,
            "rule_id": self.rule_id,
            "severity": self.severity,
            "title": self.title,
            "message": self.message,
            "details": self.details,
        })
    }

    /// Plain-text rendering used for email bodies.
    pub fn format_text(&self) -> String {
        let details = serde_json::to_string_pretty(&self.details).unwrap_or_default();
        format!(
            "[{}] {} - {}\n{}\n\nAlert: {}\nRule: {} ({})\nOccurrences: {}\n\nDetails:\n{}",
            self.severity,
            self.triggered_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.rule_name,
            self.message,
            self.alert_id,
            self.rule_name,
            self.rule_id,
            self.occurrence_count,
            details
        )
    }
}

/// What a channel did with an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// The channel has nothing to deliver to.
    Skipped(String),
}

/// Alert channel trait.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Deliver an alert.
    async fn dispatch(&self, alert: &Alert) -> Result<DispatchOutcome, MonitorError>;
}
