//! Periodic host and task metrics with threshold rules.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use autostudy_config::MetricsConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::MonitorError;
use crate::periodic::PeriodicTask;
use crate::sampler::{SysinfoSampler, SystemSampler, SystemUsage};
use crate::rules::{AlertCondition, AlertRule, Comparator, MetricName, default_threshold_rules};
use crate::task::{TaskCounts, TaskInfo, TaskStatus, TaskUpdate};

const DEFAULT_HISTORY_SIZE: usize = 300;
const ALERT_HISTORY_LIMIT: usize = 1000;

/// One collector reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network_sent: u64,
    pub network_recv: u64,
    pub active_threads: usize,
    pub tasks: TaskCounts,
}

impl MetricsSample {
    pub fn new(timestamp: DateTime<Utc>, usage: SystemUsage, tasks: TaskCounts) -> Self {
        Self {
            timestamp,
            cpu_percent: usage.cpu_percent,
            memory_percent: usage.memory_percent,
            disk_percent: usage.disk_percent,
            network_sent: usage.network_sent,
            network_recv: usage.network_recv,
            active_threads: usage.active_threads,
            tasks,
        }
    }

    pub fn value(&self, metric: MetricName) -> f64 {
        match metric {
            MetricName::CpuPercent => self.cpu_percent,
            MetricName::MemoryPercent => self.memory_percent,
            MetricName::DiskPercent => self.disk_percent,
            MetricName::NetworkSent => self.network_sent as f64,
            MetricName::NetworkRecv => self.network_recv as f64,
            MetricName::ActiveThreads => self.active_threads as f64,
            MetricName::RunningTasks => self.tasks.running as f64,
            MetricName::PendingTasks => self.tasks.pending as f64,
            MetricName::FailedTasks => self.tasks.failed as f64,
        }
    }

    /// Weighted score in `[0, 100]`; lower usage scores higher.
    ///
    /// CPU and memory weigh 0.3, disk and thread count 0.2.
    pub fn performance_score(&self) -> f64 {
        let headroom = |used: f64| (100.0 - used).clamp(0.0, 100.0);
        let score = headroom(self.cpu_percent) * 0.3
            + headroom(self.memory_percent) * 0.3
            + headroom(self.disk_percent) * 0.2
            + headroom(self.active_threads as f64) * 0.2;
        (score * 10.0).round() / 10.0
    }
}

/// Coarse health band derived from the performance score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    Critical,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl HealthBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            HealthBand::Excellent
        } else if score >= 60.0 {
            HealthBand::Good
        } else if score >= 40.0 {
            HealthBand::Fair
        } else if score >= 20.0 {
            HealthBand::Poor
        } else {
            HealthBand::Critical
        }
    }

    /// Label shown to users.
    pub fn label(&self) -> &'static str {
        match self {
            HealthBand::Excellent => "优秀",
            HealthBand::Good => "良好",
            HealthBand::Fair => "一般",
            HealthBand::Poor => "较差",
            HealthBand::Critical => "严重",
        }
    }
}

impl fmt::Display for HealthBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A metric-threshold rule that fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEvent {
    pub rule_id: String,
    pub rule_name: String,
    pub metric: MetricName,
    pub value: f64,
    pub comparator: Comparator,
    pub threshold: f64,
    pub duration_secs: u64,
    pub timestamp: DateTime<Utc>,
}

impl ThresholdEvent {
    pub fn message(&self) -> String {
        format!(
            "{}: {} = {:.1} {} {} for {}s",
            self.rule_name, self.metric, self.value, self.comparator, self.threshold, self.duration_secs
        )
    }
}

pub type StatusCallback = Arc<dyn Fn(&MetricsSample) + Send + Sync>;
pub type AlertCallback = Arc<dyn Fn(&ThresholdEvent) + Send + Sync>;

/// Snapshot written by [`MetricsCollector::export_metrics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsExport {
    pub exported_at: DateTime<Utc>,
    pub current: Option<MetricsSample>,
    pub history: Vec<MetricsSample>,
    pub alert_history: Vec<ThresholdEvent>,
    pub tasks: BTreeMap<String, TaskInfo>,
}

struct CollectorState {
    history: VecDeque<MetricsSample>,
    history_size: usize,
    tasks: BTreeMap<String, TaskInfo>,
    rules: Vec<AlertRule>,
    /// When each rule's current continuous breach started.
    breach_since: HashMap<String, DateTime<Utc>>,
    alert_history: VecDeque<ThresholdEvent>,
    status_callbacks: Vec<StatusCallback>,
    alert_callbacks: Vec<AlertCallback>,
    last_usage: SystemUsage,
}

impl CollectorState {
    fn push_sample(&mut self, sample: MetricsSample) {
        if self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    fn evaluate_rules(&mut self, sample: &MetricsSample) -> Vec<ThresholdEvent> {
        let mut fired = Vec::new();

        for rule in self.rules.iter().filter(|r| r.enabled) {
            let AlertCondition::MetricThreshold {
                metric,
                comparator,
                threshold,
                duration_secs,
            } = rule.condition
            else {
                continue;
            };

            let value = sample.value(metric);
            if !comparator.evaluate(value, threshold) {
                self.breach_since.remove(&rule.id);
                continue;
            }

            let since = *self
                .breach_since
                .entry(rule.id.clone())
                .or_insert(sample.timestamp);
            let held = sample.timestamp - since;
            if held >= chrono::Duration::seconds(duration_secs as i64) {
                fired.push(ThresholdEvent {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    metric,
                    value,
                    comparator,
                    threshold,
                    duration_secs,
                    timestamp: sample.timestamp,
                });
                self.breach_since.insert(rule.id.clone(), sample.timestamp);
            }
        }

        for event in &fired {
            if self.alert_history.len() >= ALERT_HISTORY_LIMIT {
                self.alert_history.pop_front();
            }
            self.alert_history.push_back(event.clone());
        }
        fired
    }
}

/// Samples the host on an interval, tracks tasks and evaluates
/// metric-threshold rules against each sample.
pub struct MetricsCollector {
    state: Mutex<CollectorState>,
    sampler: Mutex<Box<dyn SystemSampler>>,
    worker: PeriodicTask,
}

impl MetricsCollector {
    /// Collector with no rules and a history of `history_size` samples.
    pub fn new(sampler: Box<dyn SystemSampler>, history_size: usize) -> Self {
        Self {
            state: Mutex::new(CollectorState {
                history: VecDeque::new(),
                history_size: history_size.max(1),
                tasks: BTreeMap::new(),
                rules: Vec::new(),
                breach_since: HashMap::new(),
                alert_history: VecDeque::new(),
                status_callbacks: Vec::new(),
                alert_callbacks: Vec::new(),
                last_usage: SystemUsage::default(),
            }),
            sampler: Mutex::new(sampler),
            worker: PeriodicTask::new("metrics-collector"),
        }
    }

    /// Collector backed by the host sampler, with the built-in rules if enabled.
    pub fn from_config(config: &MetricsConfig) -> Result<Self, MonitorError> {
        Self::with_sampler(Box::new(SysinfoSampler::new()), config)
    }

    pub fn with_sampler(
        sampler: Box<dyn SystemSampler>,
        config: &MetricsConfig,
    ) -> Result<Self, MonitorError> {
        let collector = Self::new(sampler, config.history_size);
        if config.default_rules {
            for rule in default_threshold_rules() {
                collector.add_alert_rule(rule)?;
            }
        }
        Ok(collector)
    }

    // ---- tasks ----

    /// Register a task in `Pending`. An existing task with the same id is replaced.
    pub fn add_task(&self, task_id: impl Into<String>, name: impl Into<String>) -> TaskInfo {
        let task = TaskInfo::new(task_id, name);
        self.state
            .lock()
            .tasks
            .insert(task.task_id.clone(), task.clone());
        debug!(task_id = %task.task_id, name = %task.name, "Task registered");
        task
    }

    /// Apply a partial update. Status changes on finished tasks are ignored.
    pub fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<TaskInfo, MonitorError> {
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| MonitorError::TaskNotFound(task_id.to_string()))?;

        let previous = task.status;
        let requested = update.status;
        if !task.apply(update, Utc::now()) {
            warn!(
                task_id = %task_id,
                status = %previous,
                requested = ?requested.map(|s| s.as_str()),
                "Ignoring status change on finished task"
            );
        }
        Ok(task.clone())
    }

    pub fn remove_task(&self, task_id: &str) -> Option<TaskInfo> {
        self.state.lock().tasks.remove(task_id)
    }

    pub fn task(&self, task_id: &str) -> Option<TaskInfo> {
        self.state.lock().tasks.get(task_id).cloned()
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.state.lock().tasks.values().cloned().collect()
    }

    pub fn task_statistics(&self) -> TaskCounts {
        TaskCounts::from_tasks(self.state.lock().tasks.values())
    }

    pub fn tasks_in(&self, status: TaskStatus) -> Vec<TaskInfo> {
        self.state
            .lock()
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    // ---- samples ----

    pub fn current_metrics(&self) -> Option<MetricsSample> {
        self.state.lock().history.back().cloned()
    }

    /// Samples taken in the last `minutes`, oldest first.
    pub fn history(&self, minutes: u32) -> Vec<MetricsSample> {
        let since = Utc::now() - chrono::Duration::minutes(i64::from(minutes));
        self.state
            .lock()
            .history
            .iter()
            .filter(|s| s.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn history_size(&self) -> usize {
        self.state.lock().history_size
    }

    // ---- rules and callbacks ----

    /// Add or replace a metric-threshold rule.
    pub fn add_alert_rule(&self, rule: AlertRule) -> Result<(), MonitorError> {
        rule.validate()?;
        if !rule.is_threshold() {
            return Err(MonitorError::InvalidRule(format!(
                "rule '{}' is not a metric threshold rule",
                rule.id
            )));
        }

        let mut state = self.state.lock();
        state.breach_since.remove(&rule.id);
        match state.rules.iter().position(|r| r.id == rule.id) {
            Some(index) => state.rules[index] = rule,
            None => state.rules.push(rule),
        }
        Ok(())
    }

    pub fn remove_alert_rule(&self, rule_id: &str) -> bool {
        let mut state = self.state.lock();
        state.breach_since.remove(rule_id);
        let before = state.rules.len();
        state.rules.retain(|r| r.id != rule_id);
        state.rules.len() != before
    }

    pub fn alert_rules(&self) -> Vec<AlertRule> {
        self.state.lock().rules.clone()
    }

    /// Called with every new sample.
    pub fn add_status_callback<F>(&self, callback: F)
    where
        F: Fn(&MetricsSample) + Send + Sync + 'static,
    {
        self.state.lock().status_callbacks.push(Arc::new(callback));
    }

    /// Called with every threshold event.
    pub fn add_alert_callback<F>(&self, callback: F)
    where
        F: Fn(&ThresholdEvent) + Send + Sync + 'static,
    {
        self.state.lock().alert_callbacks.push(Arc::new(callback));
    }

    /// Threshold events from the last `hours`, oldest first.
    pub fn alert_history(&self, hours: u32) -> Vec<ThresholdEvent> {
        let since = Utc::now() - chrono::Duration::hours(i64::from(hours));
        self.state
            .lock()
            .alert_history
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect()
    }

    // ---- health ----

    /// Score of the latest sample; 100 before the first sample.
    pub fn performance_score(&self) -> f64 {
        self.current_metrics()
            .map(|s| s.performance_score())
            .unwrap_or(100.0)
    }

    pub fn system_health(&self) -> HealthBand {
        HealthBand::from_score(self.performance_score())
    }

    // ---- export ----

    pub fn snapshot(&self) -> MetricsExport {
        let state = self.state.lock();
        MetricsExport {
            exported_at: Utc::now(),
            current: state.history.back().cloned(),
            history: state.history.iter().cloned().collect(),
            alert_history: state.alert_history.iter().cloned().collect(),
            tasks: state.tasks.clone(),
        }
    }

    /// Write the current sample, history, threshold events and tasks as JSON.
    pub fn export_metrics(&self, path: &Path) -> Result<(), MonitorError> {
        let export = self.snapshot();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&export)?)?;
        info!(path = %path.display(), samples = export.history.len(), "Metrics exported");
        Ok(())
    }

    // ---- sampling ----

    /// Sample the host and record a sample now.
    ///
    /// A sampler failure is logged and the previous readings are reused.
    pub fn tick(&self) -> MetricsSample {
        let sampled = self.sampler.lock().sample();
        let usage = match sampled {
            Ok(usage) => usage,
            Err(e) => {
                warn!(error = %e, "System sampling failed, reusing previous readings");
                self.state.lock().last_usage
            }
        };
        self.record_sample(usage, Utc::now())
    }

    /// Record a sample taken at `timestamp`, evaluate rules and notify callbacks.
    pub fn record_sample(&self, usage: SystemUsage, timestamp: DateTime<Utc>) -> MetricsSample {
        let (sample, events, status_callbacks, alert_callbacks) = {
            let mut state = self.state.lock();
            state.last_usage = usage;
            let sample = MetricsSample::new(timestamp, usage, TaskCounts::from_tasks(state.tasks.values()));
            state.push_sample(sample.clone());
            let events = state.evaluate_rules(&sample);
            let alert_callbacks = if events.is_empty() {
                Vec::new()
            } else {
                state.alert_callbacks.clone()
            };
            (sample, events, state.status_callbacks.clone(), alert_callbacks)
        };

        for callback in &status_callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&sample))).is_err() {
                warn!("Status callback panicked");
            }
        }

        for event in &events {
            warn!(
                rule_id = %event.rule_id,
                metric = %event.metric,
                value = event.value,
                threshold = event.threshold,
                "Threshold rule fired"
            );
            for callback in &alert_callbacks {
                if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                    warn!(rule_id = %event.rule_id, "Alert callback panicked");
                }
            }
        }

        sample
    }

    /// Start sampling every `interval`. Returns `false` if already running.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let collector = Arc::clone(self);
        self.worker.start(interval, interval, move || {
            let collector = Arc::clone(&collector);
            async move {
                tokio::task::spawn_blocking(move || collector.tick())
                    .await
                    .map(|_| ())
                    .map_err(|e| MonitorError::MetricsCollection(e.to_string()))
            }
        })
    }

    pub async fn stop(&self) {
        self.worker.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(Box::new(SysinfoSampler::new()), DEFAULT_HISTORY_SIZE)
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
