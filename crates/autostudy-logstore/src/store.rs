//! The structured log store.

use std::collections::VecDeque;
use std::fs;
use std::panic::{self, AssertUnwindSafe, Location};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use autostudy_config::{ConfigLoader, LoggingConfig};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::analysis::{ErrorSummary, LogStats, summarize_errors};
use crate::entry::{LogCategory, LogContext, LogEntry, LogLevel, LogRecord, module_from_file};
use crate::error::LogStoreError;
use crate::rotation::RotationPolicy;
use crate::sinks::FileSinks;

/// Error returned by a log handler.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

type Filter = Arc<dyn Fn(&LogEntry) -> bool + Send + Sync>;
type Handler = Arc<dyn Fn(&LogEntry) -> Result<(), HandlerError> + Send + Sync>;

/// Log store settings.
#[derive(Debug, Clone)]
pub struct LogStoreConfig {
    /// Directory for the JSON-lines files; `None` keeps entries in memory only.
    pub dir: Option<PathBuf>,
    /// In-memory window size.
    pub capacity: usize,
    pub rotation: RotationPolicy,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            dir: None,
            capacity: 1000,
            rotation: RotationPolicy::default(),
        }
    }
}

impl From<&LoggingConfig> for LogStoreConfig {
    fn from(config: &LoggingConfig) -> Self {
        let dir = config.persist.then(|| {
            PathBuf::from(ConfigLoader::expand_path(&config.dir.to_string_lossy()))
        });
        Self {
            dir,
            capacity: config.capacity,
            rotation: RotationPolicy {
                max_bytes: config.max_file_size_mb.saturating_mul(1024 * 1024),
                retention_days: config.retention_days,
                compression: config.compression,
            },
        }
    }
}

struct StoreState {
    entries: VecDeque<Arc<LogEntry>>,
    capacity: usize,
    stats: LogStats,
    last_timestamp: Option<DateTime<Utc>>,
    filters: Vec<Filter>,
    handlers: Vec<Handler>,
}

/// Bounded in-memory log window with statistics, handlers and file sinks.
///
/// The file sinks sit behind their own lock. Their writer channel is
/// non-lossy, so a stalled writer thread makes `log` wait on the sink lock,
/// but never while the window lock is held: queries and in-memory logging
/// keep working. Under contention, lines from concurrent callers may land in
/// the files slightly out of timestamp order.
pub struct LogStore {
    state: Mutex<StoreState>,
    sinks: Mutex<Option<FileSinks>>,
    persistent: AtomicBool,
}

impl LogStore {
    /// Create a store, opening the file sinks when a directory is configured.
    pub fn new(config: LogStoreConfig) -> Result<Self, LogStoreError> {
        let sinks = match &config.dir {
            Some(dir) => {
                let sinks = FileSinks::open(dir, config.rotation)?;
                info!(dir = %dir.display(), "Structured log files enabled");
                Some(sinks)
            }
            None => None,
        };
        Ok(Self::with_sinks(config.capacity, sinks))
    }

    /// Create a store that keeps entries in memory only.
    pub fn in_memory(capacity: usize) -> Self {
        Self::with_sinks(capacity, None)
    }

    fn with_sinks(capacity: usize, sinks: Option<FileSinks>) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(StoreState {
                entries: VecDeque::with_capacity(capacity),
                capacity,
                stats: LogStats::new(Utc::now()),
                last_timestamp: None,
                filters: Vec::new(),
                handlers: Vec::new(),
            }),
            persistent: AtomicBool::new(sinks.is_some()),
            sinks: Mutex::new(sinks),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Record an entry.
    ///
    /// The module defaults to the caller's source file. Timestamps are assigned
    /// under the lock, so the window is ordered.
    #[track_caller]
    pub fn log(&self, record: LogRecord) -> Arc<LogEntry> {
        let default_module = module_from_file(Location::caller().file());

        let (entry, filters, handlers) = {
            let mut state = self.state.lock();
            let now = Utc::now();
            let timestamp = match state.last_timestamp {
                Some(last) if last > now => last,
                _ => now,
            };
            state.last_timestamp = Some(timestamp);

            let entry = Arc::new(record.into_entry(timestamp, &default_module));
            if state.entries.len() >= state.capacity {
                state.entries.pop_front();
            }
            state.entries.push_back(Arc::clone(&entry));
            state.stats.record(&entry);

            (entry, state.filters.clone(), state.handlers.clone())
        };

        self.persist(&entry);

        mirror_to_tracing(&entry);
        run_handlers(&entry, &filters, &handlers);
        entry
    }

    #[track_caller]
    pub fn debug(&self, category: LogCategory, message: impl Into<String>) -> Arc<LogEntry> {
        self.log(LogRecord::new(LogLevel::Debug, category, message))
    }

    #[track_caller]
    pub fn info(&self, category: LogCategory, message: impl Into<String>) -> Arc<LogEntry> {
        self.log(LogRecord::new(LogLevel::Info, category, message))
    }

    #[track_caller]
    pub fn warning(&self, category: LogCategory, message: impl Into<String>) -> Arc<LogEntry> {
        self.log(LogRecord::new(LogLevel::Warning, category, message))
    }

    #[track_caller]
    pub fn error(&self, category: LogCategory, message: impl Into<String>) -> Arc<LogEntry> {
        self.log(LogRecord::new(LogLevel::Error, category, message))
    }

    #[track_caller]
    pub fn critical(&self, category: LogCategory, message: impl Into<String>) -> Arc<LogEntry> {
        self.log(LogRecord::new(LogLevel::Critical, category, message))
    }

    #[track_caller]
    pub fn log_user_action(&self, user_id: &str, action: &str, details: &str) -> Arc<LogEntry> {
        let message = if details.is_empty() {
            format!("User action: {}", action)
        } else {
            format!("User action: {} {}", action, details)
        };
        self.log(
            LogRecord::new(LogLevel::Info, LogCategory::User, message)
                .context(LogContext::for_user(user_id)),
        )
    }

    #[track_caller]
    pub fn log_automation_step(
        &self,
        task_id: &str,
        step: &str,
        status: &str,
        duration: Option<f64>,
    ) -> Arc<LogEntry> {
        let mut record = LogRecord::new(
            LogLevel::Info,
            LogCategory::Automation,
            format!("Automation step: {} - {}", step, status),
        )
        .context(LogContext::for_task(task_id));
        record.duration = duration;
        self.log(record)
    }

    #[track_caller]
    pub fn log_browser_action(&self, action: &str, url: &str, details: &str) -> Arc<LogEntry> {
        let mut message = format!("Browser action: {}", action);
        if !url.is_empty() {
            message.push_str(" - ");
            message.push_str(url);
        }
        if !details.is_empty() {
            message.push_str(" - ");
            message.push_str(details);
        }
        self.log(LogRecord::new(LogLevel::Info, LogCategory::Browser, message))
    }

    #[track_caller]
    pub fn log_network_request(
        &self,
        method: &str,
        url: &str,
        status_code: u16,
        duration: f64,
        user_agent: Option<&str>,
    ) -> Arc<LogEntry> {
        let mut context = LogContext::default();
        context.user_agent = user_agent.map(str::to_string);
        self.log(
            LogRecord::new(
                LogLevel::Info,
                LogCategory::Network,
                format!("Network request: {} {} - {}", method, url, status_code),
            )
            .context(context)
            .duration(duration),
        )
    }

    /// The value is recorded as the entry's duration.
    #[track_caller]
    pub fn log_performance_metric(&self, name: &str, value: f64, unit: &str) -> Arc<LogEntry> {
        let message = format!("Performance metric: {} = {} {}", name, value, unit);
        self.log(
            LogRecord::new(LogLevel::Info, LogCategory::Performance, message.trim_end())
                .duration(value),
        )
    }

    /// Logged at WARNING when `severity` is `HIGH`, INFO otherwise.
    #[track_caller]
    pub fn log_security_event(
        &self,
        event_type: &str,
        description: &str,
        peer_addr: Option<&str>,
        severity: &str,
    ) -> Arc<LogEntry> {
        let level = if severity == "HIGH" {
            LogLevel::Warning
        } else {
            LogLevel::Info
        };
        let mut context = LogContext::default();
        context.peer_addr = peer_addr.map(str::to_string);
        self.log(
            LogRecord::new(
                level,
                LogCategory::Security,
                format!("Security event: {} - {}", event_type, description),
            )
            .context(context),
        )
    }

    /// Register a filter. Handlers only run for entries every filter accepts.
    pub fn add_filter<F>(&self, filter: F)
    where
        F: Fn(&LogEntry) -> bool + Send + Sync + 'static,
    {
        self.state.lock().filters.push(Arc::new(filter));
    }

    /// Register a handler. Errors and panics are reported, never propagated.
    pub fn add_handler<F>(&self, handler: F)
    where
        F: Fn(&LogEntry) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.state.lock().handlers.push(Arc::new(handler));
    }

    /// The most recent `limit` entries matching the optional level and
    /// category, oldest first.
    pub fn recent_logs(
        &self,
        limit: usize,
        level: Option<LogLevel>,
        category: Option<LogCategory>,
    ) -> Vec<LogEntry> {
        let state = self.state.lock();
        let mut matched: Vec<LogEntry> = state
            .entries
            .iter()
            .rev()
            .filter(|e| level.is_none_or(|l| e.level == l))
            .filter(|e| category.is_none_or(|c| e.category == c))
            .take(limit)
            .map(|e| (**e).clone())
            .collect();
        matched.reverse();
        matched
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn statistics(&self) -> LogStats {
        self.state.lock().stats.clone()
    }

    /// Reset counters. The in-memory window is kept.
    pub fn clear_stats(&self) {
        self.state.lock().stats = LogStats::new(Utc::now());
    }

    /// Grouped ERROR/CRITICAL entries from the last `hours`.
    pub fn error_summary(&self, hours: u32) -> Vec<ErrorSummary> {
        let since = Utc::now() - Duration::hours(i64::from(hours));
        let state = self.state.lock();
        summarize_errors(state.entries.iter().map(|e| e.as_ref()), since)
    }

    fn entries_since(&self, since: DateTime<Utc>) -> Vec<LogEntry> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|e| e.timestamp >= since)
            .map(|e| (**e).clone())
            .collect()
    }

    /// Write entries from the last `hours` as a pretty JSON array.
    pub fn export_logs(&self, path: &Path, hours: u32) -> Result<usize, LogStoreError> {
        let since = Utc::now() - Duration::hours(i64::from(hours));
        let entries = self.entries_since(since);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&entries)?;
        fs::write(path, json)?;

        debug!(path = %path.display(), count = entries.len(), "Exported logs");
        Ok(entries.len())
    }

    fn persist(&self, entry: &LogEntry) {
        if !self.persistent.load(Ordering::Relaxed) {
            return;
        }
        let Some(line) = FileSinks::encode(entry) else {
            return;
        };
        if let Some(sinks) = self.sinks.lock().as_mut() {
            sinks.write_line(entry, &line);
        }
    }

    /// Read back a file written by [`LogStore::export_logs`].
    pub fn read_export(path: &Path) -> Result<Vec<LogEntry>, LogStoreError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Flush and close the file sinks. Later entries stay in memory only.
    pub fn shutdown(&self) {
        self.persistent.store(false, Ordering::Relaxed);
        let sinks = self.sinks.lock().take();
        if sinks.is_some() {
            drop(sinks);
            debug!("Structured log files closed");
        }
    }
}

fn mirror_to_tracing(entry: &LogEntry) {
    let category = entry.category.as_str();
    let module = entry.module.as_str();
    let task_id = entry.context.task_id.as_deref().unwrap_or("");
    let message = entry.message.as_str();
    match entry.level {
        LogLevel::Debug => debug!(category = category, module = module, task_id = task_id, "{}", message),
        LogLevel::Info => info!(category = category, module = module, task_id = task_id, "{}", message),
        LogLevel::Warning => warn!(category = category, module = module, task_id = task_id, "{}", message),
        LogLevel::Error | LogLevel::Critical => error!(
            category = category,
            module = module,
            task_id = task_id,
            severity = entry.level.as_str(),
            error = entry.error.as_deref().unwrap_or(""),
            "{}",
            message
        ),
    }
}

fn run_handlers(entry: &LogEntry, filters: &[Filter], handlers: &[Handler]) {
    if handlers.is_empty() {
        return;
    }

    for filter in filters {
        match panic::catch_unwind(AssertUnwindSafe(|| filter(entry))) {
            Ok(true) => {}
            Ok(false) => return,
            Err(_) => {
                warn!("Log filter panicked, entry not forwarded");
                return;
            }
        }
    }

    for handler in handlers {
        match panic::catch_unwind(AssertUnwindSafe(|| handler(entry))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Log handler failed"),
            Err(_) => warn!("Log handler panicked"),
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
