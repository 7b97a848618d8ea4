//! Running statistics and error grouping over stored entries.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{LogCategory, LogEntry, LogLevel};

/// Number of message characters used to group errors.
const GROUP_PREFIX_CHARS: usize = 50;

/// Counts per level and per category since the last reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogStats {
    pub total: u64,
    pub by_level: BTreeMap<LogLevel, u64>,
    pub by_category: BTreeMap<LogCategory, u64>,
    pub since: DateTime<Utc>,
}

impl LogStats {
    pub fn new(since: DateTime<Utc>) -> Self {
        Self {
            total: 0,
            by_level: BTreeMap::new(),
            by_category: BTreeMap::new(),
            since,
        }
    }

    pub fn record(&mut self, entry: &LogEntry) {
        self.total += 1;
        *self.by_level.entry(entry.level).or_default() += 1;
        *self.by_category.entry(entry.category).or_default() += 1;
    }

    pub fn level_count(&self, level: LogLevel) -> u64 {
        self.by_level.get(&level).copied().unwrap_or(0)
    }

    pub fn category_count(&self, category: LogCategory) -> u64 {
        self.by_category.get(&category).copied().unwrap_or(0)
    }

    /// ERROR plus CRITICAL.
    pub fn error_count(&self) -> u64 {
        self.level_count(LogLevel::Error) + self.level_count(LogLevel::Critical)
    }
}

/// A group of similar errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub module: String,
    pub sample_message: String,
    pub count: usize,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
}

/// Group ERROR/CRITICAL entries at or after `since` by module and message prefix,
/// most frequent first.
pub fn summarize_errors<'a, I>(entries: I, since: DateTime<Utc>) -> Vec<ErrorSummary>
where
    I: IntoIterator<Item = &'a LogEntry>,
{
    let mut groups: HashMap<(String, String), ErrorSummary> = HashMap::new();

    for entry in entries {
        if !entry.level.is_error() || entry.timestamp < since {
            continue;
        }
        let prefix: String = entry.message.chars().take(GROUP_PREFIX_CHARS).collect();
        groups
            .entry((entry.module.clone(), prefix))
            .and_modify(|group| {
                group.count += 1;
                group.first_occurrence = group.first_occurrence.min(entry.timestamp);
                group.last_occurrence = group.last_occurrence.max(entry.timestamp);
            })
            .or_insert_with(|| ErrorSummary {
                module: entry.module.clone(),
                sample_message: entry.message.clone(),
                count: 1,
                first_occurrence: entry.timestamp,
                last_occurrence: entry.timestamp,
            });
    }

    let mut summaries: Vec<ErrorSummary> = groups.into_values().collect();
    summaries.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| b.last_occurrence.cmp(&a.last_occurrence))
    });
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LogRecord;
    use chrono::Duration;

    fn entry(level: LogLevel, module: &str, message: &str, at: DateTime<Utc>) -> LogEntry {
        LogRecord::new(level, LogCategory::System, message).into_entry(at, module)
    }

    #[test]
    fn test_stats_record() {
        let now = Utc::now();
        let mut stats = LogStats::new(now);
        stats.record(&entry(LogLevel::Info, "a", "x", now));
        stats.record(&entry(LogLevel::Error, "a", "y", now));
        stats.record(&entry(LogLevel::Critical, "a", "z", now));

        assert_eq!(stats.total, 3);
        assert_eq!(stats.level_count(LogLevel::Info), 1);
        assert_eq!(stats.level_count(LogLevel::Debug), 0);
        assert_eq!(stats.error_count(), 2);
        assert_eq!(stats.category_count(LogCategory::System), 3);
    }

    #[test]
    fn test_summarize_groups_by_module_and_prefix() {
        let now = Utc::now();
        let long_a = format!("{}{}", "x".repeat(50), "first tail");
        let long_b = format!("{}{}", "x".repeat(50), "second tail");
        let entries = vec![
            entry(LogLevel::Error, "login", &long_a, now - Duration::seconds(30)),
            entry(LogLevel::Error, "login", &long_b, now - Duration::seconds(10)),
            entry(LogLevel::Critical, "video", "player crashed", now),
            entry(LogLevel::Warning, "login", &long_a, now),
        ];

        let summary = summarize_errors(&entries, now - Duration::hours(1));
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].module, "login");
        assert_eq!(summary[0].count, 2);
        assert_eq!(summary[0].first_occurrence, now - Duration::seconds(30));
        assert_eq!(summary[0].last_occurrence, now - Duration::seconds(10));
        assert_eq!(summary[1].module, "video");
        assert_eq!(summary[1].count, 1);
    }

    #[test]
    fn test_summarize_respects_window() {
        let now = Utc::now();
        let entries = vec![
            entry(LogLevel::Error, "old", "stale", now - Duration::hours(3)),
            entry(LogLevel::Error, "new", "fresh", now),
        ];

        let summary = summarize_errors(&entries, now - Duration::hours(1));
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].module, "new");
    }

    #[test]
    fn test_summarize_multibyte_prefix() {
        let now = Utc::now();
        let message = "连接失败".repeat(20);
        let entries = vec![entry(LogLevel::Error, "net", &message, now)];
        let summary = summarize_errors(&entries, now - Duration::hours(1));
        assert_eq!(summary[0].sample_message, message);
    }
}
