//! Alert channel implementations (console, file, email, webhook).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use autostudy_config::EmailConfig;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::MonitorError;
use crate::rules::ChannelKind;

use super::alerts::{Alert, AlertChannel, DispatchOutcome};

const ANSI_RESET: &str = "\x1b[0m";
const PANEL_WIDTH: usize = 60;
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Prints a coloured panel to stdout.
pub struct ConsoleChannel;

impl ConsoleChannel {
    pub fn render(alert: &Alert) -> String {
        let color = alert.severity.ansi_color();
        let rule = "=".repeat(PANEL_WIDTH);
        format!(
            "{color}{rule}\n{icon} {title}\n{rule}{reset}\n{message}\nrule: {rule_id}  alert: {alert_id}\ntime: {time}\n{color}{rule}{reset}",
            color = color,
            rule = rule,
            icon = alert.severity.icon(),
            title = alert.title,
            reset = ANSI_RESET,
            message = alert.message,
            rule_id = alert.rule_id,
            alert_id = alert.alert_id,
            time = alert.triggered_at.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}

#[async_trait]
impl AlertChannel for ConsoleChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Console
    }

    async fn dispatch(&self, alert: &Alert) -> Result<DispatchOutcome, MonitorError> {
        println!("{}", Self::render(alert));
        Ok(DispatchOutcome::Delivered)
    }
}

/// Appends one JSON object per alert to a file.
pub struct FileChannel {
    path: PathBuf,
}

impl FileChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AlertChannel for FileChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::File
    }

    async fn dispatch(&self, alert: &Alert) -> Result<DispatchOutcome, MonitorError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(&alert.file_record())?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(path = %self.path.display(), alert_id = %alert.alert_id, "Alert written to file");
        Ok(DispatchOutcome::Delivered)
    }
}

/// Sends a plain-text email through SMTP.
pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn dispatch(&self, alert: &Alert) -> Result<DispatchOutcome, MonitorError> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
            message::header::ContentType, transport::smtp::authentication::Credentials,
        };

        if self.config.recipients.is_empty() {
            return Ok(DispatchOutcome::Skipped("no recipients".to_string()));
        }

        let sender = self
            .config
            .sender()
            .ok_or_else(|| MonitorError::ChannelNotConfigured("email sender".to_string()))?;

        let mut builder = Message::builder()
            .from(
                sender
                    .parse()
                    .map_err(|e| MonitorError::delivery("email", format!("bad sender: {}", e)))?,
            )
            .subject(format!("[AutoStudy] {}", alert.title));
        for recipient in &self.config.recipients {
            builder = builder.to(recipient.parse().map_err(|e| {
                MonitorError::delivery("email", format!("bad recipient '{}': {}", recipient, e))
            })?);
        }

        let email = builder
            .header(ContentType::TEXT_PLAIN)
            .body(alert.format_text())
            .map_err(|e| MonitorError::delivery("email", e.to_string()))?;

        let mut transport =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| MonitorError::delivery("email", e.to_string()))?
                .port(self.config.smtp_port);

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            transport = transport.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        transport
            .build()
            .send(email)
            .await
            .map_err(|e| MonitorError::delivery("email", e.to_string()))?;

        info!(
            alert_id = %alert.alert_id,
            recipients = self.config.recipients.len(),
            "Alert email sent"
        );
        Ok(DispatchOutcome::Delivered)
    }
}

/// Posts the alert as JSON to every configured URL.
pub struct WebhookChannel {
    urls: Vec<String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(urls: Vec<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { urls, client }
    }

    fn payload(alert: &Alert) -> serde_json::Value {
        serde_json::json!({
            "alert_id": alert.alert_id,
            "rule_id": alert.rule_id,
            "rule_name": alert.rule_name,
            "severity": alert.severity,
            "status": alert.status,
            "title": alert.title,
            "message": alert.message,
            "details": alert.details,
            "triggered_at": alert.triggered_at,
            "occurrence_count": alert.occurrence_count,
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn dispatch(&self, alert: &Alert) -> Result<DispatchOutcome, MonitorError> {
        if self.urls.is_empty() {
            return Ok(DispatchOutcome::Skipped("no webhook urls".to_string()));
        }

        let payload = Self::payload(alert);
        let mut failures = Vec::new();

        for url in &self.urls {
            match self.client.post(url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(url = %url, "Webhook alert sent");
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    failures.push(format!("{} returned {}: {}", url, status, body));
                }
                Err(e) => failures.push(format!("{}: {}", url, e)),
            }
        }

        if failures.is_empty() {
            Ok(DispatchOutcome::Delivered)
        } else {
            Err(MonitorError::delivery("webhook", failures.join("; ")))
        }
    }
}
