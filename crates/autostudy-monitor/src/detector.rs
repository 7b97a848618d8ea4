//! Pattern-based anomaly detection over a log window and a metrics sample.
//!
//! Every detector is a pure function of its input and the evaluation time,
//! so the same window can be replayed deterministically in tests.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;

use autostudy_logstore::{LogCategory, LogEntry};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use crate::error::MonitorError;
use crate::metrics::MetricsSample;

const ERROR_SPIKE_WINDOW_SECS: i64 = 300;
const ERROR_SPIKE_THRESHOLD: usize = 10;

const PERFORMANCE_WINDOW_SECS: i64 = 600;
const PERFORMANCE_MIN_SAMPLES: usize = 5;
const PERFORMANCE_AVG_LIMIT: f64 = 5.0;
const PERFORMANCE_MAX_LIMIT: f64 = 30.0;

const CPU_EXHAUSTED: f64 = 90.0;
const MEMORY_EXHAUSTED: f64 = 95.0;
const DISK_EXHAUSTED: f64 = 98.0;

const SECURITY_WINDOW_SECS: i64 = 600;
const SECURITY_THRESHOLD: usize = 5;

const SERVICE_WINDOW_SECS: i64 = 300;
const SERVICE_THRESHOLD: usize = 3;

/// Failure phrases, matched as case-insensitive substrings.
const SERVICE_FAILURE_PHRASES: &[&str] = &[
    "connection failed",
    "service unavailable",
    "连接失败",
    "服务不可用",
];

const SAMPLE_MESSAGES: usize = 3;

/// Known anomaly patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyPattern {
    ErrorSpike,
    PerformanceDegradation,
    ResourceExhaustion,
    SuspiciousActivity,
    ServiceUnavailable,
}

impl AnomalyPattern {
    pub const ALL: [AnomalyPattern; 5] = [
        AnomalyPattern::ErrorSpike,
        AnomalyPattern::PerformanceDegradation,
        AnomalyPattern::ResourceExhaustion,
        AnomalyPattern::SuspiciousActivity,
        AnomalyPattern::ServiceUnavailable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyPattern::ErrorSpike => "error_spike",
            AnomalyPattern::PerformanceDegradation => "performance_degradation",
            AnomalyPattern::ResourceExhaustion => "resource_exhaustion",
            AnomalyPattern::SuspiciousActivity => "suspicious_activity",
            AnomalyPattern::ServiceUnavailable => "service_unavailable",
        }
    }
}

impl fmt::Display for AnomalyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnomalyPattern {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnomalyPattern::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| MonitorError::InvalidRule(format!("unknown pattern '{}'", s)))
    }
}

/// A detected anomaly with its evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum Anomaly {
    ErrorSpike {
        error_count: usize,
        time_window: u64,
        threshold: usize,
        sample_errors: Vec<String>,
    },
    PerformanceDegradation {
        avg_duration: f64,
        max_duration: f64,
        sample_count: usize,
        threshold_avg: f64,
        threshold_max: f64,
    },
    ResourceExhaustion {
        resources: Vec<String>,
        cpu_percent: f64,
        memory_percent: f64,
        disk_percent: f64,
    },
    SuspiciousActivity {
        security_events: usize,
        sample_events: Vec<String>,
    },
    ServiceUnavailable {
        failure_count: usize,
        failures: Vec<String>,
    },
}

impl Anomaly {
    pub fn pattern(&self) -> AnomalyPattern {
        match self {
            Anomaly::ErrorSpike { .. } => AnomalyPattern::ErrorSpike,
            Anomaly::PerformanceDegradation { .. } => AnomalyPattern::PerformanceDegradation,
            Anomaly::ResourceExhaustion { .. } => AnomalyPattern::ResourceExhaustion,
            Anomaly::SuspiciousActivity { .. } => AnomalyPattern::SuspiciousActivity,
            Anomaly::ServiceUnavailable { .. } => AnomalyPattern::ServiceUnavailable,
        }
    }

    /// Structured details, tagged with `pattern`.
    pub fn details(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "pattern": self.pattern().as_str() })
        })
    }
}

/// What the detectors look at.
#[derive(Debug, Clone, Copy)]
pub struct DetectionInput<'a> {
    pub logs: &'a [LogEntry],
    pub metrics: Option<&'a MetricsSample>,
    pub now: DateTime<Utc>,
}

impl<'a> DetectionInput<'a> {
    fn recent(self, window_secs: i64) -> impl Iterator<Item = &'a LogEntry> + 'a {
        let since = self.now - Duration::seconds(window_secs);
        self.logs.iter().filter(move |e| e.timestamp >= since)
    }
}

type Detector = fn(&DetectionInput<'_>) -> Option<Anomaly>;

const DETECTORS: [(AnomalyPattern, Detector); 5] = [
    (AnomalyPattern::ErrorSpike, detect_error_spike),
    (AnomalyPattern::PerformanceDegradation, detect_performance_degradation),
    (AnomalyPattern::ResourceExhaustion, detect_resource_exhaustion),
    (AnomalyPattern::SuspiciousActivity, detect_suspicious_activity),
    (AnomalyPattern::ServiceUnavailable, detect_service_unavailable),
];

/// Run every detector over the window. A detector that panics is logged and
/// skipped; the others still run.
pub fn detect_anomalies(
    logs: &[LogEntry],
    metrics: Option<&MetricsSample>,
    now: DateTime<Utc>,
) -> Vec<Anomaly> {
    let input = DetectionInput { logs, metrics, now };
    run_detectors(&DETECTORS, &input)
}

fn run_detectors(
    detectors: &[(AnomalyPattern, Detector)],
    input: &DetectionInput<'_>,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    for (pattern, detector) in detectors {
        match panic::catch_unwind(AssertUnwindSafe(|| detector(input))) {
            Ok(Some(anomaly)) => {
                trace!(pattern = %pattern, "Anomaly detected");
                anomalies.push(anomaly);
            }
            Ok(None) => {}
            Err(_) => error!(pattern = %pattern, "Anomaly detector panicked, skipping"),
        }
    }
    anomalies
}

/// More than 10 ERROR/CRITICAL entries in the last 5 minutes.
pub fn detect_error_spike(input: &DetectionInput<'_>) -> Option<Anomaly> {
    let errors: Vec<&LogEntry> = input
        .recent(ERROR_SPIKE_WINDOW_SECS)
        .filter(|e| e.level.is_error())
        .collect();

    (errors.len() > ERROR_SPIKE_THRESHOLD).then(|| Anomaly::ErrorSpike {
        error_count: errors.len(),
        time_window: ERROR_SPIKE_WINDOW_SECS as u64,
        threshold: ERROR_SPIKE_THRESHOLD,
        sample_errors: errors
            .iter()
            .take(SAMPLE_MESSAGES)
            .map(|e| e.message.clone())
            .collect(),
    })
}

/// At least 5 timed performance entries in the last 10 minutes whose mean
/// exceeds 5 s or whose max exceeds 30 s.
pub fn detect_performance_degradation(input: &DetectionInput<'_>) -> Option<Anomaly> {
    let durations: Vec<f64> = input
        .recent(PERFORMANCE_WINDOW_SECS)
        .filter(|e| e.category == LogCategory::Performance)
        .filter_map(|e| e.duration)
        .collect();

    if durations.len() < PERFORMANCE_MIN_SAMPLES {
        return None;
    }

    let avg = durations.iter().sum::<f64>() / durations.len() as f64;
    let max = durations.iter().copied().fold(f64::MIN, f64::max);

    (avg > PERFORMANCE_AVG_LIMIT || max > PERFORMANCE_MAX_LIMIT).then(|| {
        Anomaly::PerformanceDegradation {
            avg_duration: avg,
            max_duration: max,
            sample_count: durations.len(),
            threshold_avg: PERFORMANCE_AVG_LIMIT,
            threshold_max: PERFORMANCE_MAX_LIMIT,
        }
    })
}

/// CPU above 90%, memory above 95% or disk above 98%. Needs a metrics sample.
pub fn detect_resource_exhaustion(input: &DetectionInput<'_>) -> Option<Anomaly> {
    let sample = input.metrics?;

    let mut resources = Vec::new();
    if sample.cpu_percent > CPU_EXHAUSTED {
        resources.push("cpu".to_string());
    }
    if sample.memory_percent > MEMORY_EXHAUSTED {
        resources.push("memory".to_string());
    }
    if sample.disk_percent > DISK_EXHAUSTED {
        resources.push("disk".to_string());
    }

    (!resources.is_empty()).then(|| Anomaly::ResourceExhaustion {
        resources,
        cpu_percent: sample.cpu_percent,
        memory_percent: sample.memory_percent,
        disk_percent: sample.disk_percent,
    })
}

/// More than 5 security entries in the last 10 minutes.
pub fn detect_suspicious_activity(input: &DetectionInput<'_>) -> Option<Anomaly> {
    let events: Vec<&LogEntry> = input
        .recent(SECURITY_WINDOW_SECS)
        .filter(|e| e.category == LogCategory::Security)
        .collect();

    (events.len() > SECURITY_THRESHOLD).then(|| Anomaly::SuspiciousActivity {
        security_events: events.len(),
        sample_events: events
            .iter()
            .take(SAMPLE_MESSAGES)
            .map(|e| e.message.clone())
            .collect(),
    })
}

/// More than 3 entries in the last 5 minutes mentioning a connection or
/// service failure.
pub fn detect_service_unavailable(input: &DetectionInput<'_>) -> Option<Anomaly> {
    let failures: Vec<String> = input
        .recent(SERVICE_WINDOW_SECS)
        .filter(|e| mentions_service_failure(&e.message))
        .map(|e| e.message.clone())
        .collect();

    (failures.len() > SERVICE_THRESHOLD).then(|| Anomaly::ServiceUnavailable {
        failure_count: failures.len(),
        failures,
    })
}

fn mentions_service_failure(message: &str) -> bool {
    let lowered = message.to_lowercase();
    SERVICE_FAILURE_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}

#[cfg(test)]
#[path = "detector_tests.rs"]
mod tests;
