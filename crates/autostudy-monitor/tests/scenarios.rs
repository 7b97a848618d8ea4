//! End-to-end behaviour of the monitoring pipeline through the public API.

use std::sync::Arc;

use autostudy_logstore::{LogCategory, LogEntry, LogLevel, LogRecord, LogStore};
use autostudy_monitor::{
    AlertManager, AlertRule, AlertSeverity, AlertStatus, AnomalyPattern, Comparator,
    MetricName, MetricsCollector, MetricsSample, MonitorError, SystemSampler, SystemUsage,
    TaskCounts, default_pattern_rules,
};
use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;

struct IdleSampler;

impl SystemSampler for IdleSampler {
    fn sample(&mut self) -> Result<SystemUsage, MonitorError> {
        Ok(SystemUsage::default())
    }
}

fn silent_manager() -> AlertManager {
    AlertManager::with_channels(Vec::new())
}

fn spike_rule() -> AlertRule {
    AlertRule::pattern(
        "error_spike",
        "Error spike",
        AnomalyPattern::ErrorSpike,
        AlertSeverity::High,
    )
}

fn errors_at(at: DateTime<Utc>, count: usize) -> Vec<LogEntry> {
    (0..count)
        .map(|i| {
            LogRecord::new(LogLevel::Error, LogCategory::Browser, format!("element {} missing", i))
                .into_entry(at, "player")
        })
        .collect()
}

fn usage_with_cpu(cpu: f64) -> SystemUsage {
    SystemUsage {
        cpu_percent: cpu,
        ..SystemUsage::default()
    }
}

#[tokio::test]
async fn scenario_error_burst_raises_one_high_alert() {
    let store = LogStore::in_memory(100);
    for i in 0..11 {
        store.error(LogCategory::Network, format!("upload {} failed", i));
    }

    let manager = silent_manager();
    for rule in default_pattern_rules() {
        manager.add_rule(rule).unwrap();
    }

    let logs = store.recent_logs(100, None, None);
    let raised = manager.process_detections(&logs, None).await;

    assert_eq!(raised.len(), 1);
    let alert = &raised[0];
    assert_eq!(alert.rule_id, "error_spike");
    assert_eq!(alert.status, AlertStatus::Active);
    assert_eq!(alert.severity, AlertSeverity::High);
    assert_eq!(alert.details["error_count"], 11);
    assert_eq!(manager.active_alerts().len(), 1);
}

#[test]
fn scenario_sustained_cpu_fires_once_at_thirty_seconds() {
    let collector = MetricsCollector::new(Box::new(IdleSampler), 100);
    collector
        .add_alert_rule(AlertRule::metric_threshold(
            "high_cpu",
            "High CPU usage",
            MetricName::CpuPercent,
            Comparator::Gt,
            80.0,
            30,
        ))
        .unwrap();

    let start = Utc::now() - Duration::seconds(60);
    for second in 0..=30 {
        collector.record_sample(usage_with_cpu(95.0), start + Duration::seconds(second));
    }

    let fired = collector.alert_history(1);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].rule_id, "high_cpu");
    assert_eq!(fired[0].timestamp, start + Duration::seconds(30));
    assert_eq!(fired[0].value, 95.0);
}

#[tokio::test]
async fn scenario_acknowledge_then_resolve() {
    let manager = silent_manager();
    manager.add_rule(spike_rule()).unwrap();

    let raised = manager
        .process_detections(&errors_at(Utc::now(), 11), None)
        .await;
    let id = raised[0].alert_id.clone();

    let acknowledged = manager.acknowledge_alert(&id).unwrap();
    assert_eq!(acknowledged.status, AlertStatus::Acknowledged);
    assert!(acknowledged.acknowledged_at.is_some());

    let resolved = manager.resolve_alert(&id).unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert!(resolved.acknowledged_at.is_some());
    assert!(resolved.resolved_at.is_some());

    assert!(matches!(
        manager.resolve_alert(&id),
        Err(MonitorError::AlertNotFound(_))
    ));
}

#[tokio::test]
async fn scenario_disabled_rule_stays_quiet() {
    let manager = silent_manager();
    manager.add_rule(spike_rule()).unwrap();
    manager.disable_rule("error_spike");

    let now = Utc::now();
    let logs = errors_at(now, 12);
    assert!(manager.process_detections_at(&logs, None, now).await.is_empty());
    assert!(manager.active_alerts().is_empty());

    manager.enable_rule("error_spike");
    let raised = manager.process_detections_at(&logs, None, now).await;
    assert_eq!(raised.len(), 1);
}

#[tokio::test]
async fn cooldown_limits_new_alerts_under_continuous_breach() {
    let manager = silent_manager();
    manager.add_rule(spike_rule().with_cooldown(300)).unwrap();

    let start = Utc::now();
    let mut raised = Vec::new();
    // A breach every 10 s for 10 minutes, resolving whatever is open each time.
    for step in 0..60 {
        let now = start + Duration::seconds(step * 10);
        raised.extend(
            manager
                .process_detections_at(&errors_at(now, 11), None, now)
                .await,
        );
        if step % 3 == 2 {
            for alert in manager.active_alerts() {
                manager.resolve_alert(&alert.alert_id).unwrap();
            }
        }
    }

    assert!(raised.len() <= 2, "raised {} alerts", raised.len());
    for pair in raised.windows(2) {
        let gap = pair[1].triggered_at - pair[0].triggered_at;
        assert!(gap >= Duration::seconds(300));
    }
}

#[tokio::test]
async fn breaches_while_active_count_occurrences() {
    let manager = silent_manager();
    manager.add_rule(spike_rule()).unwrap();

    let start = Utc::now();
    for step in 0..4 {
        let now = start + Duration::seconds(step * 5);
        manager.process_detections_at(&errors_at(now, 11), None, now).await;
    }

    let active = manager.active_alerts();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].occurrence_count, 4);
}

#[tokio::test]
async fn hourly_cap_bounds_new_alerts() {
    let manager = silent_manager();
    manager
        .add_rule(spike_rule().with_cooldown(0).with_max_per_hour(3))
        .unwrap();

    let hour_start = DateTime::from_timestamp(1_700_002_800, 0).unwrap();
    let mut raised = 0;
    for step in 0..10 {
        let now = hour_start + Duration::seconds(step * 60);
        raised += manager
            .process_detections_at(&errors_at(now, 11), None, now)
            .await
            .len();
        for alert in manager.active_alerts() {
            manager.resolve_alert(&alert.alert_id).unwrap();
        }
    }
    assert_eq!(raised, 3);

    let next_hour = hour_start + Duration::hours(1);
    let again = manager
        .process_detections_at(&errors_at(next_hour, 11), None, next_hour)
        .await;
    assert_eq!(again.len(), 1);
}

#[tokio::test]
async fn resolved_alerts_remain_in_history() {
    let manager = silent_manager();
    manager.add_rule(spike_rule()).unwrap();

    let raised = manager
        .process_detections(&errors_at(Utc::now(), 11), None)
        .await;
    manager.resolve_alert(&raised[0].alert_id).unwrap();

    assert!(manager.active_alerts().is_empty());
    let history = manager.alert_history(1);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AlertStatus::Resolved);
}

#[test]
fn performance_score_is_bounded_and_non_increasing() {
    let now = Utc::now();
    let score = |cpu: f64, memory: f64, disk: f64| {
        MetricsSample::new(
            now,
            SystemUsage {
                cpu_percent: cpu,
                memory_percent: memory,
                disk_percent: disk,
                ..SystemUsage::default()
            },
            TaskCounts::default(),
        )
        .performance_score()
    };

    let levels = [0.0, 25.0, 50.0, 75.0, 100.0, 120.0];
    for &a in &levels {
        for &b in &levels {
            let s = score(a, b, 50.0);
            assert!((0.0..=100.0).contains(&s));
            if let Some(&higher) = levels.iter().find(|&&l| l > a) {
                assert!(score(higher, b, 50.0) <= s);
                assert!(score(b, higher, 50.0) <= score(b, a, 50.0));
                assert!(score(50.0, b, higher) <= score(50.0, b, a));
            }
        }
    }
}

#[test]
fn recent_logs_are_ordered_and_bounded() {
    let store = LogStore::in_memory(5);
    for i in 0..8 {
        store.info(LogCategory::System, format!("m{}", i));
    }

    let logs = store.recent_logs(100, None, None);
    assert_eq!(logs.len(), 5);
    assert_eq!(logs[0].message, "m3");
    assert_eq!(logs[4].message, "m7");
    assert!(logs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn exported_logs_parse_back_unchanged() {
    let dir = TempDir::new().unwrap();
    let store = LogStore::in_memory(100);
    store.info(LogCategory::User, "opened course");
    store.warning(LogCategory::Network, "slow response");
    store.error(LogCategory::Browser, "tab crashed");
    store.debug(LogCategory::Automation, "clicked next");

    let path = dir.path().join("logs.json");
    let written = store.export_logs(&path, 24).unwrap();
    assert_eq!(written, 4);

    let original = store.recent_logs(100, None, None);
    let parsed = LogStore::read_export(&path).unwrap();
    assert_eq!(parsed.len(), original.len());
    for (a, b) in parsed.iter().zip(&original) {
        assert_eq!(a.message, b.message);
        assert_eq!(a.level, b.level);
        assert_eq!(a.category, b.category);
        assert_eq!(a.timestamp, b.timestamp);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn collector_loop_samples_until_stopped() {
    let collector = Arc::new(MetricsCollector::new(Box::new(IdleSampler), 50));
    assert!(collector.start(std::time::Duration::from_millis(10)));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    collector.stop().await;

    let taken = collector.history(1).len();
    assert!(taken >= 1);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(collector.history(1).len(), taken);
}
