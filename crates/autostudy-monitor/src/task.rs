//! Tracked automation tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle state. `Success`, `Failed` and `Cancelled` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub name: String,
    pub status: TaskStatus,
    /// Percent complete, 0 to 100.
    pub progress: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl TaskInfo {
    pub fn new(task_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            name: name.into(),
            status: TaskStatus::Pending,
            progress: 0.0,
            start_time: None,
            end_time: None,
            error_message: None,
        }
    }

    /// Apply an update at `now`.
    ///
    /// Returns `false` when the update tried to change the status of a task
    /// that already reached a final state; nothing is applied in that case.
    pub fn apply(&mut self, update: TaskUpdate, now: DateTime<Utc>) -> bool {
        if let Some(status) = update.status {
            if self.status.is_terminal() && status != self.status {
                return false;
            }
            if status == TaskStatus::Running && self.start_time.is_none() {
                self.start_time = Some(now);
            }
            if status.is_terminal() && self.end_time.is_none() {
                self.end_time = Some(now);
            }
            self.status = status;
        }
        if let Some(progress) = update.progress {
            self.progress = progress.clamp(0.0, 100.0);
        }
        if let Some(message) = update.error_message {
            self.error_message = Some(message);
        }
        true
    }
}

/// A partial task update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<f64>,
    pub error_message: Option<String>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: f64) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Number of tasks in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl TaskCounts {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskInfo>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Success => counts.success += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.success + self.failed + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_sets_start_time() {
        let now = Utc::now();
        let mut task = TaskInfo::new("t1", "watch video");
        assert!(task.apply(TaskUpdate::status(TaskStatus::Running), now));
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.start_time, Some(now));
        assert!(task.end_time.is_none());
    }

    #[test]
    fn test_terminal_is_final() {
        let now = Utc::now();
        let mut task = TaskInfo::new("t1", "login");
        task.apply(TaskUpdate::status(TaskStatus::Running), now);
        task.apply(
            TaskUpdate::status(TaskStatus::Failed).with_error("captcha rejected"),
            now,
        );

        assert!(!task.apply(TaskUpdate::status(TaskStatus::Success), now));
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("captcha rejected"));
        assert_eq!(task.end_time, Some(now));
    }

    #[test]
    fn test_progress_clamped() {
        let mut task = TaskInfo::new("t1", "x");
        task.apply(TaskUpdate::progress(150.0), Utc::now());
        assert_eq!(task.progress, 100.0);
        task.apply(TaskUpdate::progress(-3.0), Utc::now());
        assert_eq!(task.progress, 0.0);
    }

    #[test]
    fn test_counts() {
        let now = Utc::now();
        let mut running = TaskInfo::new("a", "a");
        running.apply(TaskUpdate::status(TaskStatus::Running), now);
        let pending = TaskInfo::new("b", "b");
        let mut done = TaskInfo::new("c", "c");
        done.apply(TaskUpdate::status(TaskStatus::Success), now);

        let counts = TaskCounts::from_tasks([&running, &pending, &done]);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.success, 1);
        assert_eq!(counts.total(), 3);
    }
}
