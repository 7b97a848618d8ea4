use super::*;
use crate::alerts::{AlertChannel, DispatchOutcome};
use crate::sampler::{SystemSampler, SystemUsage};
use crate::rules::ChannelKind;
use async_trait::async_trait;
use std::sync::atomic::AtomicBool;
use crate::rules::{Comparator, MetricName, default_pattern_rules};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

struct FixedSampler(SystemUsage);

impl SystemSampler for FixedSampler {
    fn sample(&mut self) -> Result<SystemUsage, MonitorError> {
        Ok(self.0)
    }
}

fn quiet_usage() -> SystemUsage {
    SystemUsage {
        cpu_percent: 10.0,
        memory_percent: 20.0,
        disk_percent: 30.0,
        network_sent: 0,
        network_recv: 0,
        active_threads: 4,
    }
}

fn manager_with(settings: MonitorSettings) -> MonitoringManager {
    let store = Arc::new(LogStore::in_memory(1000));
    let collector = Arc::new(MetricsCollector::new(Box::new(FixedSampler(quiet_usage())), 100));
    let alerts = Arc::new(AlertManager::with_channels(Vec::new()));
    for rule in default_pattern_rules() {
        alerts.add_rule(rule).unwrap();
    }
    MonitoringManager::new(store, collector, alerts, settings)
}

fn manager() -> MonitoringManager {
    manager_with(MonitorSettings::default())
}

#[derive(Default)]
struct CountingSink {
    statuses: AtomicUsize,
    logs: AtomicUsize,
}

impl DisplaySink for CountingSink {
    fn on_status(&self, _sample: &MetricsSample) {
        self.statuses.fetch_add(1, Ordering::SeqCst);
    }

    fn on_log(&self, _entry: &LogEntry) {
        self.logs.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_task_context_complete() {
    let manager = manager();
    let guard = manager.task_context("watch lecture", Some("lecture-1"));
    assert_eq!(guard.task_id(), "lecture-1");
    assert_eq!(
        manager.collector().task("lecture-1").unwrap().status,
        TaskStatus::Running
    );
    guard.complete();

    let task = manager.collector().task("lecture-1").unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.progress, 100.0);
    assert!(task.end_time.is_some());

    let logs = manager.log_store().recent_logs(10, None, Some(LogCategory::Automation));
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].message, "Task started: watch lecture");
    assert_eq!(logs[1].message, "Task completed: watch lecture");
    assert!(logs[1].duration.is_some());
    assert_eq!(logs[1].context.task_id.as_deref(), Some("lecture-1"));
}

#[test]
fn test_task_context_generates_id() {
    let manager = manager();
    let guard = manager.task_context("quiz", None);
    assert!(guard.task_id().starts_with("task_"));
    guard.complete();
}

#[test]
fn test_dropped_guard_marks_failure() {
    let manager = manager();
    {
        let _guard = manager.task_context("login", Some("t1"));
    }
    let task = manager.collector().task("t1").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.is_some());

    let errors = manager.log_store().recent_logs(10, Some(LogLevel::Error), None);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "Task failed: login");
}

#[tokio::test]
async fn test_run_task_returns_error_unchanged() {
    let manager = manager();
    let result: Result<(), String> = manager
        .run_task("submit", Some("t2"), |_| async { Err("captcha rejected".to_string()) })
        .await;
    assert_eq!(result, Err("captcha rejected".to_string()));

    let task = manager.collector().task("t2").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message.as_deref(), Some("captcha rejected"));

    let failed = manager.log_store().recent_logs(1, Some(LogLevel::Error), None);
    assert_eq!(failed[0].error.as_deref(), Some("captcha rejected"));
}

#[tokio::test]
async fn test_run_task_success() {
    let manager = manager();
    let value = manager
        .run_task("count", None, |task_id| async move {
            Ok::<_, MonitorError>(task_id.len())
        })
        .await
        .unwrap();
    assert!(value > "task_".len());
    assert_eq!(manager.collector().task_statistics().success, 1);
}

#[test]
fn test_update_task_progress() {
    let manager = manager();
    let guard = manager.task_context("video", Some("v1"));

    let task = manager
        .update_task_progress("v1", 42.0, Some("chapter 3"))
        .unwrap();
    assert_eq!(task.progress, 42.0);
    let last = manager.log_store().recent_logs(1, None, None);
    assert_eq!(last[0].message, "Task progress 42%: chapter 3");

    manager.update_task_progress("v1", 50.0, None).unwrap();
    assert_eq!(manager.log_store().recent_logs(1, None, None)[0].message, last[0].message);

    assert!(matches!(
        manager.update_task_progress("missing", 1.0, None),
        Err(MonitorError::TaskNotFound(_))
    ));
    guard.complete();
}

#[test]
fn test_threshold_event_is_logged() {
    let manager = manager();
    manager
        .collector()
        .add_alert_rule(AlertRule::metric_threshold(
            "high_cpu",
            "High CPU usage",
            MetricName::CpuPercent,
            Comparator::Gt,
            80.0,
            0,
        ))
        .unwrap();

    manager.collector().record_sample(
        SystemUsage {
            cpu_percent: 97.0,
            ..quiet_usage()
        },
        Utc::now(),
    );

    let warnings = manager.log_store().recent_logs(10, Some(LogLevel::Warning), None);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].category, LogCategory::System);
    assert_eq!(warnings[0].module, "metrics");
    assert_eq!(warnings[0].context.extra["rule_id"], "high_cpu");
    assert!(warnings[0].message.starts_with("High CPU usage"));
}

#[test]
fn test_display_sinks_receive_updates() {
    let manager = manager();
    let sink = Arc::new(CountingSink::default());
    manager.add_display_sink(sink.clone());

    manager.collector().record_sample(quiet_usage(), Utc::now());
    manager.info(LogCategory::User, "clicked play");

    assert_eq!(sink.statuses.load(Ordering::SeqCst), 1);
    assert_eq!(sink.logs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_system_health() {
    let manager = manager();
    let before = manager.system_health();
    assert_eq!(before.performance_score, 100.0);
    assert_eq!(before.health, HealthBand::Excellent);
    assert!(before.metrics.is_none());

    manager.error(LogCategory::Network, "timeout");
    manager.critical(LogCategory::System, "crash");
    manager.collector().record_sample(quiet_usage(), Utc::now());

    let after = manager.system_health();
    assert_eq!(after.error_count, 2);
    assert_eq!(after.active_alerts, 0);
    assert!(after.metrics.is_some());
    assert_eq!(after.health_label, after.health.label());
}

#[tokio::test]
async fn test_dashboard_and_alert_passthroughs() {
    let manager = manager();
    for i in 0..11 {
        manager.error(LogCategory::Browser, format!("button {} missing", i));
    }
    let logs = manager.log_store().recent_logs(100, None, None);
    let raised = manager.alert_manager().process_detections(&logs, None).await;
    assert_eq!(raised.len(), 1);

    let dashboard = manager.dashboard();
    assert_eq!(dashboard.active_alerts.len(), 1);
    assert_eq!(dashboard.alert_statistics.total_alerts, 1);
    assert_eq!(dashboard.health.active_alerts, 1);
    assert!(dashboard.top_errors.len() <= 5);
    assert_eq!(dashboard.log_stats.error_count(), 11);

    let id = raised[0].alert_id.clone();
    manager.acknowledge_alert(&id).unwrap();
    manager.resolve_alert(&id).unwrap();
    assert!(manager.active_alerts().is_empty());
    assert_eq!(manager.alert_history(1).len(), 1);
}

#[test]
fn test_export_data() {
    let dir = TempDir::new().unwrap();
    let manager = manager();
    manager.info(LogCategory::System, "hello");
    manager.collector().record_sample(quiet_usage(), Utc::now());

    let paths = manager.export_data(&dir.path().join("run"), 24).unwrap();
    assert_eq!(paths.metrics, dir.path().join("run_metrics.json"));
    assert_eq!(paths.logs, dir.path().join("run_logs.json"));
    assert!(paths.metrics.exists());

    let logs = LogStore::read_export(&paths.logs).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "hello");
}

#[test]
fn test_settings_from_config() {
    let settings = MonitorSettings::from(&Config::default());
    assert_eq!(settings.metrics_interval, Duration::from_secs(1));
    assert_eq!(settings.detection_interval, Duration::from_secs(5));
    assert_eq!(settings.error_backoff, Duration::from_secs(10));
    assert_eq!(settings.detection_window, 100);
}

#[test]
fn test_from_config_rejects_zero_intervals() {
    let mut config = Config::default();
    config.logging.persist = false;
    config.metrics.interval_ms = 0;

    let result = MonitoringManager::from_config(&config);
    assert!(matches!(
        result,
        Err(MonitorError::Config(autostudy_config::ConfigError::InvalidValue { ref field, .. }))
            if field == "metrics.interval_ms"
    ));
}

#[test]
fn test_from_config_builds_pipeline() {
    let mut config = Config::default();
    config.logging.persist = false;

    let manager = MonitoringManager::from_config(&config).unwrap();
    assert_eq!(manager.settings().metrics_interval, Duration::from_secs(1));
    assert_eq!(manager.alert_manager().rules().len(), 5);
    assert!(!manager.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_background_loops_raise_alerts() {
    let manager = manager_with(MonitorSettings {
        metrics_interval: Duration::from_millis(20),
        detection_interval: Duration::from_millis(20),
        ..MonitorSettings::default()
    });

    for i in 0..12 {
        manager.error(LogCategory::Network, format!("request {} failed", i));
    }

    assert!(manager.start());
    assert!(!manager.start());
    assert!(manager.is_running());

    tokio::time::sleep(Duration::from_millis(300)).await;
    manager.stop().await;
    manager.stop().await;

    assert!(!manager.is_running());
    assert!(manager.collector().current_metrics().is_some());
    let active = manager.active_alerts();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].rule_id, "error_spike");
}

/// Console stand-in that takes a while to deliver.
struct SlowChannel {
    delivered: Arc<AtomicBool>,
}

#[async_trait]
impl AlertChannel for SlowChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Console
    }

    async fn dispatch(&self, _alert: &Alert) -> Result<DispatchOutcome, MonitorError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.delivered.store(true, Ordering::SeqCst);
        Ok(DispatchOutcome::Delivered)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_waits_for_detection_dispatch() {
    let delivered = Arc::new(AtomicBool::new(false));
    let store = Arc::new(LogStore::in_memory(1000));
    let collector = Arc::new(MetricsCollector::new(Box::new(FixedSampler(quiet_usage())), 100));
    let alerts = Arc::new(AlertManager::with_channels(vec![Arc::new(SlowChannel {
        delivered: Arc::clone(&delivered),
    }) as Arc<dyn AlertChannel>]));
    for rule in default_pattern_rules() {
        alerts.add_rule(rule).unwrap();
    }
    let manager = MonitoringManager::new(
        store,
        collector,
        alerts,
        MonitorSettings {
            metrics_interval: Duration::from_millis(50),
            detection_interval: Duration::from_millis(50),
            ..MonitorSettings::default()
        },
    );

    for i in 0..11 {
        manager.error(LogCategory::Network, format!("request {} failed", i));
    }

    manager.start();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!delivered.load(Ordering::SeqCst));

    manager.stop().await;
    assert!(delivered.load(Ordering::SeqCst));
    assert!(!manager.is_running());
}
