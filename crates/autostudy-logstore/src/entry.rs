//! Log entry types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LogStoreError;

/// Log level, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// All levels in ascending severity.
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// ERROR or CRITICAL.
    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LogStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| LogStoreError::InvalidLevel(s.to_string()))
    }
}

/// Log category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    System,
    Automation,
    Browser,
    Network,
    Storage,
    User,
    Security,
    Performance,
}

impl LogCategory {
    pub const ALL: [LogCategory; 8] = [
        LogCategory::System,
        LogCategory::Automation,
        LogCategory::Browser,
        LogCategory::Network,
        LogCategory::Storage,
        LogCategory::User,
        LogCategory::Security,
        LogCategory::Performance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::System => "system",
            LogCategory::Automation => "automation",
            LogCategory::Browser => "browser",
            LogCategory::Network => "network",
            LogCategory::Storage => "storage",
            LogCategory::User => "user",
            LogCategory::Security => "security",
            LogCategory::Performance => "performance",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogCategory {
    type Err = LogStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogCategory::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| LogStoreError::InvalidCategory(s.to_string()))
    }
}

/// Contextual metadata attached to an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Remote peer address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Free-form key/value data.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl LogContext {
    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Default::default()
        }
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_peer(mut self, peer_addr: impl Into<String>) -> Self {
        self.peer_addr = Some(peer_addr.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A log entry before the store has stamped it.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    pub module: Option<String>,
    pub context: LogContext,
    pub error: Option<String>,
    pub duration: Option<f64>,
    pub tags: Vec<String>,
}

impl LogRecord {
    pub fn new(level: LogLevel, category: LogCategory, message: impl Into<String>) -> Self {
        Self {
            level,
            category,
            message: message.into(),
            module: None,
            context: LogContext::default(),
            error: None,
            duration: None,
            tags: Vec::new(),
        }
    }

    /// Override the originating module (defaults to the caller's source file).
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn context(mut self, context: LogContext) -> Self {
        self.context = context;
        self
    }

    pub fn error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Duration in seconds.
    pub fn duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Stamp the record into an immutable entry.
    pub fn into_entry(self, timestamp: DateTime<Utc>, default_module: &str) -> LogEntry {
        LogEntry {
            timestamp,
            level: self.level,
            category: self.category,
            module: self.module.unwrap_or_else(|| default_module.to_string()),
            message: self.message,
            context: self.context,
            error: self.error,
            duration: self.duration,
            tags: self.tags,
        }
    }
}

/// A stored log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub module: String,
    pub message: String,
    #[serde(default)]
    pub context: LogContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Derive a module path from a source file path, e.g.
/// `crates/autostudy-monitor/src/alert_manager.rs` -> `alert_manager`.
pub(crate) fn module_from_file(file: &str) -> String {
    let normalized = file.replace('\\', "/");
    let tail = match normalized.rfind("src/") {
        Some(idx) => &normalized[idx + 4..],
        None => normalized.as_str(),
    };
    let tail = tail.strip_suffix(".rs").unwrap_or(tail);
    let tail = tail.strip_suffix("/mod").unwrap_or(tail);
    tail.replace('/', "::")
}
