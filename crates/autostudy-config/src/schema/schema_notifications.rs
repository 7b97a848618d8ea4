//! Notification channel configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Notification channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// File the `file` channel appends alert lines to.
    #[serde(default = "default_alert_file")]
    pub alert_file: PathBuf,

    /// Webhook endpoints; the `webhook` channel is a no-op when empty.
    #[serde(default)]
    pub webhook_urls: Vec<String>,

    /// SMTP settings for the `email` channel.
    #[serde(default)]
    pub email: Option<EmailConfig>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            alert_file: default_alert_file(),
            webhook_urls: Vec::new(),
            email: None,
        }
    }
}

fn default_alert_file() -> PathBuf {
    PathBuf::from("logs/alerts.log")
}

/// Email alert configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// SMTP server.
    pub smtp_host: String,
    /// SMTP port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// From address (falls back to the username).
    #[serde(default)]
    pub from: Option<String>,
    /// SMTP username.
    #[serde(default)]
    pub username: Option<String>,
    /// SMTP password.
    #[serde(default)]
    pub password: Option<String>,
    /// To addresses.
    #[serde(default)]
    pub recipients: Vec<String>,
}

impl EmailConfig {
    /// Sender address used in the `From` header.
    pub fn sender(&self) -> Option<&str> {
        self.from.as_deref().or(self.username.as_deref())
    }
}

fn default_smtp_port() -> u16 {
    587
}
