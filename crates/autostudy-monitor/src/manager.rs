//! Monitoring manager: owns the log store, collector and alert manager, wires
//! them together and runs the background loops.

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use autostudy_config::{Config, ConditionConfig, ConfigValidator};
use autostudy_logstore::{
    ErrorSummary, LogCategory, LogContext, LogEntry, LogLevel, LogRecord, LogStats, LogStore,
    LogStoreConfig,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::alert_manager::{AlertManager, AlertStatistics};
use crate::alerts::Alert;
use crate::error::MonitorError;
use crate::metrics::{HealthBand, MetricsCollector, MetricsSample};
use crate::periodic::PeriodicTask;
use crate::rules::AlertRule;
use crate::task::{TaskInfo, TaskStatus, TaskUpdate};

const TOP_ERROR_GROUPS: usize = 5;
const ERROR_SUMMARY_HOURS: u32 = 24;

/// Something that shows live monitoring output, such as a terminal UI.
pub trait DisplaySink: Send + Sync {
    /// A new metrics sample was taken.
    fn on_status(&self, _sample: &MetricsSample) {}

    /// A log entry was recorded.
    fn on_log(&self, _entry: &LogEntry) {}
}

type Sinks = Arc<RwLock<Vec<Arc<dyn DisplaySink>>>>;

/// Loop timing.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub metrics_interval: Duration,
    pub detection_interval: Duration,
    pub error_backoff: Duration,
    /// Recent log entries handed to each detection pass.
    pub detection_window: usize,
    pub alerting_enabled: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            metrics_interval: Duration::from_secs(1),
            detection_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
            detection_window: 100,
            alerting_enabled: true,
        }
    }
}

impl From<&Config> for MonitorSettings {
    fn from(config: &Config) -> Self {
        Self {
            metrics_interval: Duration::from_millis(config.metrics.interval_ms),
            detection_interval: Duration::from_secs(config.alerting.detection_interval_secs),
            error_backoff: Duration::from_secs(config.alerting.error_backoff_secs),
            detection_window: config.alerting.detection_window,
            alerting_enabled: config.alerting.enabled,
        }
    }
}

/// Point-in-time health summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub performance_score: f64,
    pub health: HealthBand,
    pub health_label: String,
    /// ERROR and CRITICAL entries since the last stats reset.
    pub error_count: u64,
    pub active_alerts: usize,
    pub metrics: Option<MetricsSample>,
    pub timestamp: DateTime<Utc>,
}

/// Everything a dashboard needs in one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub health: SystemHealth,
    pub log_stats: LogStats,
    pub top_errors: Vec<ErrorSummary>,
    pub active_alerts: Vec<Alert>,
    pub alert_statistics: AlertStatistics,
    pub tasks: Vec<TaskInfo>,
}

/// Files written by [`MonitoringManager::export_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub metrics: PathBuf,
    pub logs: PathBuf,
}

/// Composes the monitoring pipeline.
pub struct MonitoringManager {
    log_store: Arc<LogStore>,
    collector: Arc<MetricsCollector>,
    alerts: Arc<AlertManager>,
    sinks: Sinks,
    settings: MonitorSettings,
    detection: PeriodicTask,
}

impl MonitoringManager {
    /// Wire existing components together.
    pub fn new(
        log_store: Arc<LogStore>,
        collector: Arc<MetricsCollector>,
        alerts: Arc<AlertManager>,
        settings: MonitorSettings,
    ) -> Self {
        let sinks: Sinks = Arc::new(RwLock::new(Vec::new()));

        let status_sinks = Arc::clone(&sinks);
        collector.add_status_callback(move |sample| {
            for sink in status_sinks.read().iter() {
                sink.on_status(sample);
            }
        });

        let store = Arc::clone(&log_store);
        collector.add_alert_callback(move |event| {
            let context = LogContext::default()
                .with_extra("rule_id", serde_json::json!(event.rule_id))
                .with_extra("metric", serde_json::json!(event.metric))
                .with_extra("value", serde_json::json!(event.value))
                .with_extra("threshold", serde_json::json!(event.threshold));
            store.log(
                LogRecord::new(LogLevel::Warning, LogCategory::System, event.message())
                    .module("metrics")
                    .context(context)
                    .tag("threshold"),
            );
        });

        let log_sinks = Arc::clone(&sinks);
        log_store.add_handler(move |entry| {
            for sink in log_sinks.read().iter() {
                sink.on_log(entry);
            }
            Ok(())
        });

        Self {
            log_store,
            collector,
            alerts,
            sinks,
            settings,
            detection: PeriodicTask::new("anomaly-detection"),
        }
    }

    /// Build every component from configuration.
    ///
    /// The configuration is validated first; any validation error is returned
    /// as [`MonitorError::Config`].
    pub fn from_config(config: &Config) -> Result<Self, MonitorError> {
        ConfigValidator::validate(config)?.into_result()?;

        let log_store = Arc::new(LogStore::new(LogStoreConfig::from(&config.logging))?);

        let collector = MetricsCollector::from_config(&config.metrics)?;
        for rule_config in &config.rules {
            if matches!(rule_config.condition, ConditionConfig::MetricThreshold { .. }) {
                collector.add_alert_rule(AlertRule::from_config(rule_config)?)?;
            }
        }

        let alerts = AlertManager::from_config(config)?;

        Ok(Self::new(
            log_store,
            Arc::new(collector),
            Arc::new(alerts),
            MonitorSettings::from(config),
        ))
    }

    pub fn log_store(&self) -> &Arc<LogStore> {
        &self.log_store
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn alert_manager(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn add_display_sink(&self, sink: Arc<dyn DisplaySink>) {
        self.sinks.write().push(sink);
    }

    // ---- loops ----

    /// Start metrics sampling and, if alerting is enabled, the detection loop.
    ///
    /// Calling it again while running is a no-op; returns whether anything started.
    pub fn start(&self) -> bool {
        let mut started = self.collector.start(self.settings.metrics_interval);

        if self.settings.alerting_enabled {
            let store = Arc::clone(&self.log_store);
            let collector = Arc::clone(&self.collector);
            let alerts = Arc::clone(&self.alerts);
            let window = self.settings.detection_window;

            started |= self.detection.start(
                self.settings.detection_interval,
                self.settings.error_backoff,
                move || {
                    let store = Arc::clone(&store);
                    let collector = Arc::clone(&collector);
                    let alerts = Arc::clone(&alerts);
                    async move {
                        let pass = tokio::spawn(async move {
                            let logs = store.recent_logs(window, None, None);
                            let metrics = collector.current_metrics();
                            alerts.process_detections(&logs, metrics.as_ref()).await.len()
                        });
                        let raised = pass
                            .await
                            .map_err(|e| MonitorError::Detection(e.to_string()))?;
                        if raised > 0 {
                            debug!(raised = raised, "Detection pass raised alerts");
                        }
                        Ok(())
                    }
                },
            );
        }

        if started {
            self.log_store.info(LogCategory::System, "Monitoring started");
        }
        started
    }

    /// Stop both loops, waiting a bounded time for each.
    pub async fn stop(&self) {
        let was_running = self.collector.is_running() || self.detection.is_running();
        self.collector.stop().await;
        self.detection.stop().await;
        if was_running {
            self.log_store.info(LogCategory::System, "Monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.collector.is_running() || self.detection.is_running()
    }

    /// Stop the loops and flush the log files.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.log_store.shutdown();
    }

    // ---- tasks ----

    /// Register a task as running and return a guard that records its outcome.
    ///
    /// Without an id a `task_<uuid>` id is generated.
    #[track_caller]
    pub fn task_context(&self, name: &str, task_id: Option<&str>) -> TaskGuard {
        let task_id = task_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("task_{}", uuid::Uuid::new_v4()));

        self.collector.add_task(task_id.clone(), name);
        if let Err(e) = self
            .collector
            .update_task(&task_id, TaskUpdate::status(TaskStatus::Running))
        {
            debug!(task_id = %task_id, error = %e, "Task vanished before it started");
        }
        self.log_store.log(
            LogRecord::new(
                LogLevel::Info,
                LogCategory::Automation,
                format!("Task started: {}", name),
            )
            .context(LogContext::for_task(task_id.clone())),
        );

        TaskGuard {
            task_id,
            name: name.to_string(),
            started: Instant::now(),
            collector: Arc::clone(&self.collector),
            log_store: Arc::clone(&self.log_store),
            finished: false,
        }
    }

    /// Run `work` as a tracked task. Its result is returned unchanged.
    pub async fn run_task<F, Fut, T, E>(
        &self,
        name: &str,
        task_id: Option<&str>,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let guard = self.task_context(name, task_id);
        match work(guard.task_id().to_string()).await {
            Ok(value) => {
                guard.complete();
                Ok(value)
            }
            Err(e) => {
                guard.fail(&e);
                Err(e)
            }
        }
    }

    pub fn update_task_progress(
        &self,
        task_id: &str,
        percent: f64,
        message: Option<&str>,
    ) -> Result<TaskInfo, MonitorError> {
        let task = self
            .collector
            .update_task(task_id, TaskUpdate::progress(percent))?;
        if let Some(message) = message {
            self.log_store.log(
                LogRecord::new(
                    LogLevel::Info,
                    LogCategory::Automation,
                    format!("Task progress {:.0}%: {}", task.progress, message),
                )
                .context(LogContext::for_task(task_id)),
            );
        }
        Ok(task)
    }

    // ---- queries ----

    pub fn system_health(&self) -> SystemHealth {
        let performance_score = self.collector.performance_score();
        let health = HealthBand::from_score(performance_score);
        SystemHealth {
            performance_score,
            health,
            health_label: health.label().to_string(),
            error_count: self.log_store.statistics().error_count(),
            active_alerts: self.alerts.active_alerts().len(),
            metrics: self.collector.current_metrics(),
            timestamp: Utc::now(),
        }
    }

    pub fn dashboard(&self) -> Dashboard {
        let mut top_errors = self.log_store.error_summary(ERROR_SUMMARY_HOURS);
        top_errors.truncate(TOP_ERROR_GROUPS);

        Dashboard {
            health: self.system_health(),
            log_stats: self.log_store.statistics(),
            top_errors,
            active_alerts: self.alerts.active_alerts(),
            alert_statistics: self.alerts.alert_statistics(),
            tasks: self.collector.tasks(),
        }
    }

    /// Write `{base}_metrics.json` and `{base}_logs.json` (last `hours` of logs).
    pub fn export_data(&self, base: &Path, hours: u32) -> Result<ExportPaths, MonitorError> {
        let paths = ExportPaths {
            metrics: with_suffix(base, "_metrics.json"),
            logs: with_suffix(base, "_logs.json"),
        };

        self.collector.export_metrics(&paths.metrics)?;
        let count = self.log_store.export_logs(&paths.logs, hours)?;

        info!(
            metrics = %paths.metrics.display(),
            logs = %paths.logs.display(),
            entries = count,
            "Monitoring data exported"
        );
        self.log_store.info(
            LogCategory::System,
            format!("Monitoring data exported to {}", base.display()),
        );
        Ok(paths)
    }

    // ---- alert pass-throughs ----

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.active_alerts()
    }

    pub fn alert_history(&self, hours: u32) -> Vec<Alert> {
        self.alerts.alert_history(hours)
    }

    pub fn acknowledge_alert(&self, alert_id: &str) -> Result<Alert, MonitorError> {
        self.alerts.acknowledge_alert(alert_id)
    }

    pub fn resolve_alert(&self, alert_id: &str) -> Result<Alert, MonitorError> {
        self.alerts.resolve_alert(alert_id)
    }

    // ---- logging pass-throughs ----

    #[track_caller]
    pub fn log(&self, record: LogRecord) -> Arc<LogEntry> {
        self.log_store.log(record)
    }

    #[track_caller]
    pub fn info(&self, category: LogCategory, message: impl Into<String>) -> Arc<LogEntry> {
        self.log_store.info(category, message)
    }

    #[track_caller]
    pub fn warning(&self, category: LogCategory, message: impl Into<String>) -> Arc<LogEntry> {
        self.log_store.warning(category, message)
    }

    #[track_caller]
    pub fn error(&self, category: LogCategory, message: impl Into<String>) -> Arc<LogEntry> {
        self.log_store.error(category, message)
    }

    #[track_caller]
    pub fn critical(&self, category: LogCategory, message: impl Into<String>) -> Arc<LogEntry> {
        self.log_store.critical(category, message)
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Tracks one running task. Finish it with [`complete`](Self::complete) or
/// [`fail`](Self::fail); dropping it unfinished marks the task failed.
pub struct TaskGuard {
    task_id: String,
    name: String,
    started: Instant,
    collector: Arc<MetricsCollector>,
    log_store: Arc<LogStore>,
    finished: bool,
}

impl TaskGuard {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Mark the task successful at 100%.
    pub fn complete(mut self) {
        self.finished = true;
        let elapsed = self.elapsed().as_secs_f64();
        self.update(TaskUpdate::status(TaskStatus::Success).with_progress(100.0));
        self.log_store.log(
            LogRecord::new(
                LogLevel::Info,
                LogCategory::Automation,
                format!("Task completed: {}", self.name),
            )
            .context(LogContext::for_task(self.task_id.clone()))
            .duration(elapsed),
        );
    }

    /// Mark the task failed with `error`.
    pub fn fail(mut self, error: &dyn fmt::Display) {
        self.finished = true;
        self.record_failure(error.to_string());
    }

    fn record_failure(&self, message: String) {
        let elapsed = self.elapsed().as_secs_f64();
        self.update(TaskUpdate::status(TaskStatus::Failed).with_error(message.clone()));
        self.log_store.log(
            LogRecord::new(
                LogLevel::Error,
                LogCategory::Automation,
                format!("Task failed: {}", self.name),
            )
            .context(LogContext::for_task(self.task_id.clone()))
            .error(message)
            .duration(elapsed),
        );
    }

    fn update(&self, update: TaskUpdate) {
        if let Err(e) = self.collector.update_task(&self.task_id, update) {
            debug!(task_id = %self.task_id, error = %e, "Task removed before it finished");
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.record_failure("task dropped before completion".to_string());
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
