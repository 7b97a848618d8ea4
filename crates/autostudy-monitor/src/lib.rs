//! # AutoStudy Monitor
//!
//! Runtime monitoring for the AutoStudy automation flows.
//!
//! ## Features
//!
//! - Periodic host sampling with bounded history and tracked tasks
//! - Metric threshold rules with sustained-breach detection
//! - Pattern detectors over the recent log window
//! - Alert lifecycle with cooldown, hourly caps and fan-out to channels
//!   (console, file, email, webhook)

pub mod alert_channels;
pub mod alert_manager;
pub mod alerts;
pub mod detector;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod periodic;
pub mod sampler;
pub mod rules;
pub mod task;

pub use alert_channels::{ConsoleChannel, EmailChannel, FileChannel, WebhookChannel};
pub use alert_manager::{AlertManager, AlertStatistics};
pub use alerts::{Alert, AlertChannel, AlertStatus, DispatchOutcome};
pub use detector::{Anomaly, AnomalyPattern, detect_anomalies};
pub use error::MonitorError;
pub use manager::{
    Dashboard, DisplaySink, ExportPaths, MonitorSettings, MonitoringManager, SystemHealth,
    TaskGuard,
};
pub use metrics::{HealthBand, MetricsCollector, MetricsExport, MetricsSample, ThresholdEvent};
pub use periodic::PeriodicTask;
pub use sampler::{SysinfoSampler, SystemSampler, SystemUsage};
pub use rules::{
    AlertCondition, AlertRule, AlertSeverity, ChannelKind, Comparator, MetricName,
    default_pattern_rules, default_threshold_rules,
};
pub use task::{TaskCounts, TaskInfo, TaskStatus, TaskUpdate};
