
    use super::*;
    use crate::schema::{EmailConfig, RuleConfig};

    fn pattern_rule(id: &str, pattern: &str) -> RuleConfig {
        RuleConfig {
            id: id.to_string(),
            name: None,
            description: String::new(),
            condition: ConditionConfig::Pattern {
                pattern: pattern.to_string(),
            },
            severity: "high".to_string(),
            enabled: true,
            cooldown_secs: 300,
            max_per_hour: 10,
            channels: vec!["console".to_string()],
            message_template: None,
        }
    }

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_validate_zero_capacity() {
        let mut config = Config::default();
        config.logging.capacity = 0;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.path == "logging.capacity"));
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = Config::default();
        config.metrics.interval_ms = 0;
        config.alerting.detection_interval_secs = 0;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.errors.iter().any(|e| e.path == "metrics.interval_ms"));
        assert!(result
            .errors
            .iter()
            .any(|e| e.path == "alerting.detection_interval_secs"));
    }

    #[test]
    fn test_validate_detection_window_warning() {
        let mut config = Config::default();
        config.logging.capacity = 50;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.path == "alerting.detection_window"));
    }

    #[test]
    fn test_validate_invalid_webhook_url() {
        let mut config = Config::default();
        config.notifications.webhook_urls = vec!["ftp://example.com".to_string()];

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(!result.is_valid());
    }

    #[test]
    fn test_validate_unknown_pattern() {
        let mut config = Config::default();
        config.rules.push(pattern_rule("odd", "moon_phase"));

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result
            .errors
            .iter()
            .any(|e| e.path == "rules.odd.condition.pattern"));
    }

    #[test]
    fn test_validate_duplicate_rule_id() {
        let mut config = Config::default();
        config.rules.push(pattern_rule("dup", "error_spike"));
        config.rules.push(pattern_rule("dup", "service_unavailable"));

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.errors.iter().any(|e| e.message.contains("duplicate")));
    }

    #[test]
    fn test_validate_bad_threshold_rule() {
        let mut config = Config::default();
        let mut rule = pattern_rule("cpu", "error_spike");
        rule.condition = ConditionConfig::MetricThreshold {
            metric: "gpu_percent".to_string(),
            comparator: "=>".to_string(),
            threshold: 80.0,
            duration_secs: 30,
        };
        config.rules.push(rule);

        let result = ConfigValidator::validate(&config).unwrap();
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_validate_email_channel_without_recipients() {
        let mut config = Config::default();
        let mut rule = pattern_rule("sec", "suspicious_activity");
        rule.channels = vec!["email".to_string()];
        config.rules.push(rule);
        config.notifications.email = Some(EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            from: Some("bot@example.com".to_string()),
            username: None,
            password: None,
            recipients: vec![],
        });

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "rules.sec.channels"));
    }

    #[test]
    fn test_validate_unknown_severity() {
        let mut config = Config::default();
        let mut rule = pattern_rule("x", "error_spike");
        rule.severity = "urgent".to_string();
        config.rules.push(rule);

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.errors.iter().any(|e| e.path == "rules.x.severity"));
    }

    #[test]
    fn test_shipped_sample_config_is_valid() {
        let config =
            crate::ConfigLoader::load_str(include_str!("../../../config/autostudy.toml")).unwrap();
        assert_eq!(config.rules.len(), 2);

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.is_valid(), "errors: {:?}", result.errors);
        assert!(result.warnings.is_empty(), "warnings: {:?}", result.warnings);
    }

    #[test]
    fn test_into_result_passes_warnings() {
        let mut config = Config::default();
        config.logging.retention_days = 0;

        let result = ConfigValidator::validate(&config).unwrap().into_result().unwrap();
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_into_result_reports_first_error() {
        let mut config = Config::default();
        config.metrics.interval_ms = 0;
        config.alerting.detection_interval_secs = 0;

        let err = ConfigValidator::validate(&config).unwrap().into_result().unwrap_err();
        match err {
            ConfigError::InvalidValue { field, message } => {
                assert_eq!(field, "metrics.interval_ms");
                assert!(message.contains("and 1 more"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
