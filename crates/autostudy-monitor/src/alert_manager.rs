//! Alert manager: turns detections into alerts, suppresses repeats and
//! dispatches new alerts to their rule's channels.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use autostudy_config::{Config, ConditionConfig, ConfigLoader};
use autostudy_logstore::LogEntry;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detector::detect_anomalies;
use crate::error::MonitorError;
use crate::metrics::MetricsSample;
use crate::rules::{AlertRule, AlertSeverity, ChannelKind, default_pattern_rules};

use super::alert_channels::{ConsoleChannel, EmailChannel, FileChannel, WebhookChannel};
use super::alerts::{Alert, AlertChannel, DispatchOutcome};

/// Counters reported by [`AlertManager::alert_statistics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStatistics {
    pub total_alerts: usize,
    /// Alerts not yet resolved.
    pub active_alerts: usize,
    pub by_severity: BTreeMap<AlertSeverity, u64>,
    /// Detections dropped by cooldown or the hourly cap.
    pub suppressed: u64,
    pub rules_configured: usize,
    pub rules_enabled: usize,
}

#[derive(Debug, Default)]
struct RuleState {
    last_alert_at: Option<DateTime<Utc>>,
    hour_bucket: i64,
    hour_count: u32,
}

impl RuleState {
    fn is_suppressed(&self, rule: &AlertRule, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last_alert_at {
            if now - last < Duration::seconds(rule.cooldown_secs as i64) {
                return true;
            }
        }
        self.hour_bucket == hour_bucket(now) && self.hour_count >= rule.max_per_hour
    }

    fn record_alert(&mut self, now: DateTime<Utc>) {
        let bucket = hour_bucket(now);
        if self.hour_bucket != bucket {
            self.hour_bucket = bucket;
            self.hour_count = 0;
        }
        self.hour_count += 1;
        self.last_alert_at = Some(now);
    }
}

fn hour_bucket(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(3600)
}

#[derive(Default)]
struct ManagerState {
    rules: Vec<AlertRule>,
    /// Every alert ever raised, in creation order.
    history: Vec<Alert>,
    /// Unresolved alerts: alert id to index into `history`.
    open: HashMap<String, usize>,
    rule_state: HashMap<String, RuleState>,
    by_severity: BTreeMap<AlertSeverity, u64>,
    suppressed: u64,
    seq: u64,
}

impl ManagerState {
    fn active_for_rule(&mut self, rule_id: &str) -> Option<&mut Alert> {
        let index = self
            .open
            .values()
            .copied()
            .find(|&i| self.history[i].rule_id == rule_id && self.history[i].is_active())?;
        self.history.get_mut(index)
    }

    /// Apply one detection to one rule. Returns the alert when a new one is raised.
    fn handle(
        &mut self,
        rule: &AlertRule,
        details: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        if let Some(existing) = self.active_for_rule(&rule.id) {
            existing.record_occurrence(now);
            debug!(
                alert_id = %existing.alert_id,
                occurrences = existing.occurrence_count,
                "Alert still active, counting occurrence"
            );
            return None;
        }

        let rule_state = self.rule_state.entry(rule.id.clone()).or_default();
        if rule_state.is_suppressed(rule, now) {
            self.suppressed += 1;
            debug!(rule_id = %rule.id, "Alert suppressed");
            return None;
        }
        rule_state.record_alert(now);

        self.seq += 1;
        let alert_id = format!("{}_{}_{}", rule.id, now.timestamp(), self.seq);
        let alert = Alert::new(alert_id, rule, details.clone(), now);

        self.open.insert(alert.alert_id.clone(), self.history.len());
        self.history.push(alert.clone());
        *self.by_severity.entry(alert.severity).or_default() += 1;
        Some(alert)
    }

    fn open_alert(&mut self, alert_id: &str) -> Result<&mut Alert, MonitorError> {
        let index = *self
            .open
            .get(alert_id)
            .ok_or_else(|| MonitorError::AlertNotFound(alert_id.to_string()))?;
        Ok(&mut self.history[index])
    }
}

/// Raises alerts from anomaly detections.
pub struct AlertManager {
    state: Mutex<ManagerState>,
    channels: HashMap<ChannelKind, Arc<dyn AlertChannel>>,
}

impl AlertManager {
    /// Manager with no rules and only the console channel.
    pub fn new() -> Self {
        Self::with_channels(vec![Arc::new(ConsoleChannel)])
    }

    /// Manager with no rules and the given channels, keyed by their kind.
    pub fn with_channels(channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        Self {
            state: Mutex::new(ManagerState::default()),
            channels: channels.into_iter().map(|c| (c.kind(), c)).collect(),
        }
    }

    /// Build channels from `[notifications]` and rules from the built-in set
    /// plus every pattern rule in `[[rules]]`.
    pub fn from_config(config: &Config) -> Result<Self, MonitorError> {
        let notifications = &config.notifications;
        let alert_file = PathBuf::from(ConfigLoader::expand_path(
            &notifications.alert_file.to_string_lossy(),
        ));

        let mut channels: Vec<Arc<dyn AlertChannel>> = vec![
            Arc::new(ConsoleChannel),
            Arc::new(FileChannel::new(alert_file)),
            Arc::new(WebhookChannel::new(notifications.webhook_urls.clone())),
        ];
        if let Some(email) = &notifications.email {
            info!(host = %email.smtp_host, "Adding email alert channel");
            channels.push(Arc::new(EmailChannel::new(email.clone())));
        }

        let manager = Self::with_channels(channels);
        if config.alerting.default_rules {
            for rule in default_pattern_rules() {
                manager.add_rule(rule)?;
            }
        }
        for rule_config in &config.rules {
            if matches!(rule_config.condition, ConditionConfig::Pattern { .. }) {
                manager.add_rule(AlertRule::from_config(rule_config)?)?;
            }
        }
        Ok(manager)
    }

    /// Configured channel kinds.
    pub fn channel_kinds(&self) -> Vec<ChannelKind> {
        let mut kinds: Vec<_> = self.channels.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    // ---- rules ----

    /// Add or replace a pattern rule.
    pub fn add_rule(&self, rule: AlertRule) -> Result<(), MonitorError> {
        rule.validate()?;
        if rule.pattern_kind().is_none() {
            return Err(MonitorError::InvalidRule(format!(
                "rule '{}' is not a pattern rule",
                rule.id
            )));
        }

        let mut state = self.state.lock();
        match state.rules.iter().position(|r| r.id == rule.id) {
            Some(index) => state.rules[index] = rule,
            None => state.rules.push(rule),
        }
        Ok(())
    }

    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.rules.len();
        state.rules.retain(|r| r.id != rule_id);
        state.rule_state.remove(rule_id);
        state.rules.len() != before
    }

    pub fn enable_rule(&self, rule_id: &str) -> bool {
        self.set_enabled(rule_id, true)
    }

    pub fn disable_rule(&self, rule_id: &str) -> bool {
        self.set_enabled(rule_id, false)
    }

    fn set_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        let mut state = self.state.lock();
        match state.rules.iter_mut().find(|r| r.id == rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                info!(rule_id = %rule_id, enabled = enabled, "Alert rule toggled");
                true
            }
            None => false,
        }
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.state.lock().rules.clone()
    }

    // ---- detection ----

    /// Run detection over `logs` and `metrics` now.
    pub async fn process_detections(
        &self,
        logs: &[LogEntry],
        metrics: Option<&MetricsSample>,
    ) -> Vec<Alert> {
        self.process_detections_at(logs, metrics, Utc::now()).await
    }

    /// Run detection as of `now` and return the alerts newly raised.
    pub async fn process_detections_at(
        &self,
        logs: &[LogEntry],
        metrics: Option<&MetricsSample>,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let anomalies = detect_anomalies(logs, metrics, now);
        if anomalies.is_empty() {
            return Vec::new();
        }

        let raised: Vec<(Alert, Vec<ChannelKind>)> = {
            let mut state = self.state.lock();
            let mut raised = Vec::new();
            for anomaly in &anomalies {
                let pattern = anomaly.pattern();
                let details = anomaly.details();
                let matching: Vec<AlertRule> = state
                    .rules
                    .iter()
                    .filter(|r| r.enabled && r.pattern_kind() == Some(pattern))
                    .cloned()
                    .collect();
                for rule in matching {
                    if let Some(alert) = state.handle(&rule, &details, now) {
                        raised.push((alert, rule.channels));
                    }
                }
            }
            raised
        };

        for (alert, channels) in &raised {
            warn!(
                alert_id = %alert.alert_id,
                severity = %alert.severity,
                rule_id = %alert.rule_id,
                "Alert raised: {}",
                alert.message
            );
            self.dispatch(alert, channels).await;
        }

        raised.into_iter().map(|(alert, _)| alert).collect()
    }

    async fn dispatch(&self, alert: &Alert, kinds: &[ChannelKind]) {
        for kind in kinds {
            let Some(channel) = self.channels.get(kind) else {
                debug!(channel = %kind, alert_id = %alert.alert_id, "Channel not configured");
                continue;
            };
            match channel.dispatch(alert).await {
                Ok(DispatchOutcome::Delivered) => {
                    debug!(channel = %kind, alert_id = %alert.alert_id, "Alert delivered");
                }
                Ok(DispatchOutcome::Skipped(reason)) => {
                    debug!(channel = %kind, reason = %reason, "Alert delivery skipped");
                }
                Err(e) => {
                    warn!(channel = %kind, alert_id = %alert.alert_id, error = %e, "Alert delivery failed");
                }
            }
        }
    }

    // ---- lifecycle ----

    pub fn acknowledge_alert(&self, alert_id: &str) -> Result<Alert, MonitorError> {
        let mut state = self.state.lock();
        let alert = state.open_alert(alert_id)?;
        if alert.acknowledge(Utc::now()) {
            info!(alert_id = %alert_id, "Alert acknowledged");
        }
        Ok(alert.clone())
    }

    pub fn resolve_alert(&self, alert_id: &str) -> Result<Alert, MonitorError> {
        let mut state = self.state.lock();
        let alert = state.open_alert(alert_id)?;
        alert.resolve(Utc::now());
        let resolved = alert.clone();
        state.open.remove(alert_id);
        info!(alert_id = %alert_id, "Alert resolved");
        Ok(resolved)
    }

    /// Unresolved alerts, oldest first.
    pub fn active_alerts(&self) -> Vec<Alert> {
        let state = self.state.lock();
        let mut indexes: Vec<usize> = state.open.values().copied().collect();
        indexes.sort_unstable();
        indexes.into_iter().map(|i| state.history[i].clone()).collect()
    }

    /// Alerts raised in the last `hours`, including resolved ones.
    pub fn alert_history(&self, hours: u32) -> Vec<Alert> {
        let since = Utc::now() - Duration::hours(i64::from(hours));
        self.state
            .lock()
            .history
            .iter()
            .filter(|a| a.triggered_at >= since)
            .cloned()
            .collect()
    }

    pub fn alert(&self, alert_id: &str) -> Option<Alert> {
        self.state
            .lock()
            .history
            .iter()
            .find(|a| a.alert_id == alert_id)
            .cloned()
    }

    pub fn alert_statistics(&self) -> AlertStatistics {
        let state = self.state.lock();
        AlertStatistics {
            total_alerts: state.history.len(),
            active_alerts: state.open.len(),
            by_severity: state.by_severity.clone(),
            suppressed: state.suppressed,
            rules_configured: state.rules.len(),
            rules_enabled: state.rules.iter().filter(|r| r.enabled).count(),
        }
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "alert_manager_tests.rs"]
mod tests;
