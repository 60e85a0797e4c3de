//! Validation for session configurations and daemon settings.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::{
    AlertThresholds, MedicSettings, MonitorConfig, NotificationConfig, NotificationSinkKind,
    RemediationConfig, TestConfiguration, MAX_ROLLBACK_GRACE_SECS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    /// Offending configuration field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationIssue {
    fn error(code: &'static str, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: ValidationLevel::Error,
            code,
            field,
            message: message.into(),
        }
    }

    fn warning(code: &'static str, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: ValidationLevel::Warning,
            code,
            field,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == ValidationLevel::Error
    }
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

/// First error-level issue, ignoring warnings.
pub fn first_error(issues: &[ValidationIssue]) -> Option<&ValidationIssue> {
    issues.iter().find(|issue| issue.is_error())
}

impl Validate for TestConfiguration {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.id.trim().is_empty() {
            issues.push(ValidationIssue::error(
                "config.id.empty",
                "id",
                "configuration id must not be empty",
            ));
        }

        if self.environment.trim().is_empty() {
            issues.push(ValidationIssue::warning(
                "config.environment.empty",
                "environment",
                "environment is empty; reports will not say where the run happened",
            ));
        }

        if self.suites.is_empty() {
            issues.push(ValidationIssue::error(
                "config.suites.empty",
                "suites",
                "at least one suite is required",
            ));
        }

        let mut seen = HashSet::new();
        for suite in &self.suites {
            if suite.id.trim().is_empty() {
                issues.push(ValidationIssue::error(
                    "config.suites.empty_id",
                    "suites",
                    "suite id must not be empty",
                ));
            } else if !seen.insert(suite.id.as_str()) {
                issues.push(ValidationIssue::error(
                    "config.suites.duplicate",
                    "suites",
                    format!("suite {:?} is listed more than once", suite.id),
                ));
            }
        }

        let declared: HashSet<&str> = self.suites.iter().map(|suite| suite.id.as_str()).collect();
        for suite in &self.suites {
            for parent in &suite.depends_on {
                if parent == &suite.id {
                    issues.push(ValidationIssue::error(
                        "config.suites.self_dependency",
                        "suites",
                        format!("suite {:?} depends on itself", suite.id),
                    ));
                } else if !declared.contains(parent.as_str()) {
                    issues.push(ValidationIssue::error(
                        "config.suites.unknown_dependency",
                        "suites",
                        format!(
                            "suite {:?} depends on {:?}, which is not part of this configuration",
                            suite.id, parent
                        ),
                    ));
                }
            }
        }

        if self.concurrency_level == 0 {
            issues.push(ValidationIssue::error(
                "config.concurrency_level.zero",
                "concurrency_level",
                "concurrency_level must be greater than zero",
            ));
        }

        if self.timeout_ms == 0 {
            issues.push(ValidationIssue::error(
                "config.timeout.zero",
                "timeout_ms",
                "timeout_ms must be greater than zero",
            ));
        }

        if self.retry_attempts > 10 {
            issues.push(ValidationIssue::warning(
                "config.retry_attempts.high",
                "retry_attempts",
                format!(
                    "{} retry attempts per unit will hide flaky failures and stretch the run",
                    self.retry_attempts
                ),
            ));
        }

        if let Some(thresholds) = &self.thresholds {
            issues.extend(validate_thresholds(thresholds));
        }

        if self.report_formats.is_empty() {
            issues.push(ValidationIssue::warning(
                "config.report_formats.empty",
                "report_formats",
                "no report formats requested",
            ));
        }

        issues
    }
}

fn validate_thresholds(thresholds: &AlertThresholds) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if !is_percentage(thresholds.error_rate_pct) {
        issues.push(ValidationIssue::error(
            "thresholds.error_rate.range",
            "thresholds.error_rate_pct",
            format!(
                "error rate threshold {} must be within 0..=100",
                thresholds.error_rate_pct
            ),
        ));
    }

    if !thresholds.latency_ms.is_finite() || thresholds.latency_ms <= 0.0 {
        issues.push(ValidationIssue::error(
            "thresholds.latency.range",
            "thresholds.latency_ms",
            "latency threshold must be a positive number of milliseconds",
        ));
    }

    if !is_percentage(thresholds.resource_usage_pct) {
        issues.push(ValidationIssue::error(
            "thresholds.resource_usage.range",
            "thresholds.resource_usage_pct",
            format!(
                "resource usage threshold {} must be within 0..=100",
                thresholds.resource_usage_pct
            ),
        ));
    }

    issues
}

fn is_percentage(value: f64) -> bool {
    value.is_finite() && (0.0..=100.0).contains(&value)
}

impl Validate for MonitorConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.window_size == 0 {
            issues.push(ValidationIssue::error(
                "monitor.window_size.zero",
                "monitor.window_size",
                "window_size must be greater than zero",
            ));
        }

        if self.recovery_window == Some(0) {
            issues.push(ValidationIssue::error(
                "monitor.recovery_window.zero",
                "monitor.recovery_window",
                "recovery_window must be greater than zero",
            ));
        }

        if self.tracked_limit == 0 {
            issues.push(ValidationIssue::error(
                "monitor.tracked_limit.zero",
                "monitor.tracked_limit",
                "tracked_limit must be greater than zero",
            ));
        }

        if !(0.0..=1.0).contains(&self.reliability_weight) {
            issues.push(ValidationIssue::error(
                "monitor.reliability_weight.range",
                "monitor.reliability_weight",
                "reliability_weight must be within 0..=1",
            ));
        }

        for (field, value) in [
            ("monitor.error_rate_penalty", self.error_rate_penalty),
            ("monitor.latency_penalty", self.latency_penalty),
            ("monitor.critical_error_penalty", self.critical_error_penalty),
        ] {
            if !value.is_finite() || value < 0.0 {
                issues.push(ValidationIssue::error(
                    "monitor.penalty.negative",
                    field,
                    format!("{field} must be a non-negative number"),
                ));
            }
        }

        if !self.trend_dead_band_pct.is_finite() || self.trend_dead_band_pct < 0.0 {
            issues.push(ValidationIssue::error(
                "monitor.trend_dead_band.negative",
                "monitor.trend_dead_band_pct",
                "trend_dead_band_pct must be a non-negative number",
            ));
        }

        issues.extend(validate_thresholds(&self.thresholds));
        issues
    }
}

impl Validate for RemediationConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.max_parallel_fixes == 0 {
            issues.push(ValidationIssue::error(
                "remediation.max_parallel_fixes.zero",
                "remediation.max_parallel_fixes",
                "max_parallel_fixes must be greater than zero",
            ));
        }

        if self.escalation_threshold == 0 {
            issues.push(ValidationIssue::error(
                "remediation.escalation_threshold.zero",
                "remediation.escalation_threshold",
                "escalation_threshold must be greater than zero",
            ));
        }

        if self.rollback_grace_secs > MAX_ROLLBACK_GRACE_SECS {
            issues.push(ValidationIssue::error(
                "remediation.rollback_grace.range",
                "remediation.rollback_grace_secs",
                format!("rollback_grace_secs must be at most {MAX_ROLLBACK_GRACE_SECS}"),
            ));
        }

        for rule in &self.rules {
            if rule.keywords.is_empty() && rule.category.is_none() && rule.component.is_none() {
                issues.push(ValidationIssue::error(
                    "remediation.rules.unmatchable",
                    "remediation.rules",
                    format!(
                        "classifier rule {:?} needs keywords, a category or a component",
                        rule.name
                    ),
                ));
            }
        }

        issues
    }
}

impl Validate for NotificationConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.enabled_sinks.contains(&NotificationSinkKind::Slack)
            && self.slack_webhook_url.is_none()
        {
            issues.push(ValidationIssue::warning(
                "notifications.slack.incomplete",
                "notifications.slack_webhook_url",
                "slack sink is enabled but slack_webhook_url is missing",
            ));
        }

        if self.enabled_sinks.contains(&NotificationSinkKind::Webhook) && self.webhook_url.is_none()
        {
            issues.push(ValidationIssue::warning(
                "notifications.webhook.incomplete",
                "notifications.webhook_url",
                "webhook sink is enabled but webhook_url is missing",
            ));
        }

        if let Some(url) = &self.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                issues.push(ValidationIssue::warning(
                    "notifications.webhook_url.invalid",
                    "notifications.webhook_url",
                    "webhook URL should start with http:// or https://",
                ));
            }
        }

        issues
    }
}

impl Validate for MedicSettings {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = self.monitor.validate();
        issues.extend(self.remediation.validate());
        issues.extend(self.notifications.validate());
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassifierRuleConfig, SuiteSpec};
    use crate::fix::FixStrategy;

    fn valid_configuration() -> TestConfiguration {
        let mut config = TestConfiguration::new(
            "nightly",
            vec![
                SuiteSpec::new("auth"),
                SuiteSpec::new("booking").depends_on("auth"),
            ],
        );
        config.concurrency_level = 2;
        config.timeout_ms = 1_000;
        config
    }

    fn codes(issues: &[ValidationIssue]) -> Vec<&'static str> {
        issues.iter().map(|issue| issue.code).collect()
    }

    #[test]
    fn valid_configuration_has_no_issues() {
        assert!(valid_configuration().validate().is_empty());
    }

    #[test]
    fn zero_concurrency_is_rejected_with_field() {
        let mut config = valid_configuration();
        config.concurrency_level = 0;

        let issues = config.validate();
        let error = first_error(&issues).expect("error expected");
        assert_eq!(error.code, "config.concurrency_level.zero");
        assert_eq!(error.field, "concurrency_level");
    }

    #[test]
    fn suite_graph_problems_are_reported() {
        let mut config = valid_configuration();
        config.suites.push(SuiteSpec::new("auth"));
        config.suites.push(SuiteSpec::new("search").depends_on("search"));
        config.suites.push(SuiteSpec::new("reports").depends_on("billing"));

        let issues = config.validate();
        let found = codes(&issues);
        assert!(found.contains(&"config.suites.duplicate"));
        assert!(found.contains(&"config.suites.self_dependency"));
        assert!(found.contains(&"config.suites.unknown_dependency"));
    }

    #[test]
    fn thresholds_out_of_range_are_errors() {
        let mut config = valid_configuration();
        config.thresholds = Some(AlertThresholds {
            error_rate_pct: 140.0,
            latency_ms: 0.0,
            resource_usage_pct: f64::NAN,
        });

        let found = codes(&config.validate());
        assert!(found.contains(&"thresholds.error_rate.range"));
        assert!(found.contains(&"thresholds.latency.range"));
        assert!(found.contains(&"thresholds.resource_usage.range"));
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut config = valid_configuration();
        config.report_formats.clear();
        config.retry_attempts = 25;

        let issues = config.validate();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|issue| issue.level == ValidationLevel::Warning));
        assert!(first_error(&issues).is_none());
    }

    #[test]
    fn default_settings_are_valid() {
        assert!(MedicSettings::default().validate().is_empty());
    }

    #[test]
    fn settings_report_zero_windows_and_unmatchable_rules() {
        let mut settings = MedicSettings::default();
        settings.monitor.window_size = 0;
        settings.monitor.recovery_window = Some(0);
        settings.monitor.tracked_limit = 0;
        settings.remediation.rules.push(ClassifierRuleConfig {
            name: "empty".to_string(),
            strategy: FixStrategy::Network,
            keywords: Vec::new(),
            category: None,
            component: None,
            priority: 5,
        });

        let found = codes(&settings.validate());
        assert!(found.contains(&"monitor.window_size.zero"));
        assert!(found.contains(&"monitor.recovery_window.zero"));
        assert!(found.contains(&"monitor.tracked_limit.zero"));
        assert!(found.contains(&"remediation.rules.unmatchable"));
    }

    #[test]
    fn oversized_rollback_grace_is_rejected() {
        let mut settings = MedicSettings::default();
        settings.remediation.rollback_grace_secs = MAX_ROLLBACK_GRACE_SECS;
        assert!(settings.validate().is_empty());

        settings.remediation.rollback_grace_secs = 10_000_000_000_000;
        let issues = settings.validate();
        let error = first_error(&issues).expect("error expected");
        assert_eq!(error.code, "remediation.rollback_grace.range");
        assert_eq!(error.field, "remediation.rollback_grace_secs");
    }

    #[test]
    fn slack_sink_without_webhook_warns() {
        let mut settings = MedicSettings::default();
        settings.notifications.enabled_sinks = vec![NotificationSinkKind::Slack];

        let issues = settings.validate();
        assert_eq!(codes(&issues), vec!["notifications.slack.incomplete"]);
        assert!(first_error(&issues).is_none());
    }
}
