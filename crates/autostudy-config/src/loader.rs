//! Configuration loader.

use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::schema::Config;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a file, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => Ok(Config::default()),
            other => other,
        }
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let mut result = content.to_string();
        let re = regex::Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.autostudy/logs`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ConditionConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.logging.capacity, 1000);
        assert_eq!(config.metrics.interval_ms, 1000);
    }

    #[test]
    fn test_expand_path() {
        let expanded = ConfigLoader::expand_path("~/.autostudy");
        assert!(!expanded.starts_with('~'));
    }

    #[test]
    fn test_load_basic_config() {
        let content = r#"
            [logging]
            dir = "/var/log/autostudy"
            capacity = 500

            [metrics]
            interval_ms = 2000
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.logging.dir.to_str(), Some("/var/log/autostudy"));
        assert_eq!(config.logging.capacity, 500);
        assert_eq!(config.metrics.interval_ms, 2000);
    }

    #[test]
    fn test_load_full_config() {
        let content = r#"
            [alerting]
            detection_interval_secs = 10
            default_rules = false

            [notifications]
            alert_file = "out/alerts.log"
            webhook_urls = ["https://hooks.example.com/a"]

            [notifications.email]
            smtp_host = "smtp.example.com"
            username = "bot@example.com"
            recipients = ["ops@example.com"]

            [[rules]]
            id = "security"
            severity = "critical"
            channels = ["console", "email"]
            condition = { type = "pattern", pattern = "suspicious_activity" }

            [[rules]]
            id = "busy"
            condition = { type = "metric_threshold", metric = "running_tasks", comparator = ">=", threshold = 5, duration_secs = 10 }
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.alerting.detection_interval_secs, 10);
        assert!(!config.alerting.default_rules);
        assert_eq!(config.notifications.webhook_urls.len(), 1);

        let email = config.notifications.email.as_ref().unwrap();
        assert_eq!(email.smtp_port, 587);
        assert_eq!(email.recipients, vec!["ops@example.com"]);

        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].channels, vec!["console", "email"]);
        assert!(matches!(
            config.rules[1].condition,
            ConditionConfig::MetricThreshold { duration_secs: 10, .. }
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[logging]").unwrap();
        writeln!(file, "retention_days = 7").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.logging.retention_days, 7);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config =
            ConfigLoader::load_or_default(Path::new("/nonexistent/path/config.toml")).unwrap();
        assert_eq!(config.logging.capacity, 1000);
    }

    #[test]
    fn test_load_invalid_toml() {
        let content = "invalid = [unclosed";
        let result = ConfigLoader::load_str(content);
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: This test runs in isolation and sets a unique test-only env var
        unsafe {
            std::env::set_var("AUTOSTUDY_TEST_SMTP_PASSWORD", "hunter2");
        }
        let content = "password = \"${AUTOSTUDY_TEST_SMTP_PASSWORD}\"";
        let expanded = ConfigLoader::expand_env_vars(content).unwrap();
        assert!(expanded.contains("hunter2"));
        unsafe {
            std::env::remove_var("AUTOSTUDY_TEST_SMTP_PASSWORD");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${NONEXISTENT_TEST_VAR_12345}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let content = "value = \"no variables here\"";
        let expanded = ConfigLoader::expand_env_vars(content).unwrap();
        assert_eq!(expanded, content);
    }

    #[test]
    fn test_expand_path_no_tilde() {
        let path = "/usr/local/bin";
        let expanded = ConfigLoader::expand_path(path);
        assert_eq!(expanded, path);
    }
}
