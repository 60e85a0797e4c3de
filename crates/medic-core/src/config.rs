//! Configuration types: session test configuration and daemon settings.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::fix::{FixStrategy, RiskLevel};
use crate::types::ErrorCategory;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config at {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Report formats a session may request from the external renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Html,
    Json,
    Csv,
    Pdf,
}

/// Alert thresholds for the monitored metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Failed or errored share of windowed results, in percent.
    #[serde(default = "default_error_rate_pct")]
    pub error_rate_pct: f64,
    /// p95 latency ceiling in milliseconds.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: f64,
    #[serde(default = "default_resource_usage_pct")]
    pub resource_usage_pct: f64,
}

fn default_error_rate_pct() -> f64 {
    10.0
}

fn default_latency_ms() -> f64 {
    2_000.0
}

fn default_resource_usage_pct() -> f64 {
    85.0
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            error_rate_pct: default_error_rate_pct(),
            latency_ms: default_latency_ms(),
            resource_usage_pct: default_resource_usage_pct(),
        }
    }
}

/// One suite reference inside a test configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteSpec {
    pub id: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl SuiteSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, parent: impl Into<String>) -> Self {
        self.depends_on.push(parent.into());
        self
    }
}

/// Immutable description of a test run. Validated before any session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfiguration {
    pub id: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    pub suites: Vec<SuiteSpec>,
    /// Maximum units in flight at once.
    pub concurrency_level: usize,
    /// Per-attempt timeout of one unit.
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_attempts: u32,
    #[serde(default)]
    pub auto_fix_enabled: bool,
    #[serde(default)]
    pub max_risk_level: RiskLevel,
    /// Overrides the monitor's thresholds while this session runs.
    #[serde(default)]
    pub thresholds: Option<AlertThresholds>,
    #[serde(default = "default_report_formats")]
    pub report_formats: Vec<ReportFormat>,
    /// Mark units of a suite skipped when a suite it depends on had failures.
    #[serde(default = "default_true")]
    pub skip_dependents_on_failure: bool,
}

fn default_environment() -> String {
    "staging".to_string()
}

fn default_report_formats() -> Vec<ReportFormat> {
    vec![ReportFormat::Json]
}

fn default_true() -> bool {
    true
}

impl TestConfiguration {
    pub fn new(id: impl Into<String>, suites: Vec<SuiteSpec>) -> Self {
        Self {
            id: id.into(),
            environment: default_environment(),
            suites,
            concurrency_level: 1,
            timeout_ms: 30_000,
            retry_attempts: 0,
            auto_fix_enabled: false,
            max_risk_level: RiskLevel::Low,
            thresholds: None,
            report_formats: default_report_formats(),
            skip_dependents_on_failure: true,
        }
    }
}

/// Monitoring aggregator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Capacity of each rolling window (results, latency, resource samples).
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Consecutive below-threshold evaluations required to clear an alert.
    /// Unset means one full `window_size`.
    #[serde(default)]
    pub recovery_window: Option<usize>,
    /// Windowed values needed before error-rate and latency alerts are evaluated.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default)]
    pub thresholds: AlertThresholds,
    #[serde(default = "default_reliability_weight")]
    pub reliability_weight: f64,
    #[serde(default = "default_error_rate_penalty")]
    pub error_rate_penalty: f64,
    #[serde(default = "default_latency_penalty")]
    pub latency_penalty: f64,
    #[serde(default = "default_critical_error_penalty")]
    pub critical_error_penalty: f64,
    #[serde(default = "default_trend_dead_band_pct")]
    pub trend_dead_band_pct: f64,
    /// Resolved alerts kept for history queries.
    #[serde(default = "default_alert_history_limit")]
    pub alert_history_limit: usize,
    /// Distinct resource gauges and open critical errors tracked at once.
    /// The least recently touched entry is dropped beyond this.
    #[serde(default = "default_tracked_limit")]
    pub tracked_limit: usize,
}

impl MonitorConfig {
    pub fn effective_recovery_window(&self) -> usize {
        self.recovery_window.unwrap_or(self.window_size)
    }
}

fn default_window_size() -> usize {
    100
}

fn default_min_samples() -> usize {
    5
}

fn default_reliability_weight() -> f64 {
    0.5
}

fn default_error_rate_penalty() -> f64 {
    15.0
}

fn default_latency_penalty() -> f64 {
    10.0
}

fn default_critical_error_penalty() -> f64 {
    10.0
}

fn default_trend_dead_band_pct() -> f64 {
    20.0
}

fn default_alert_history_limit() -> usize {
    500
}

fn default_tracked_limit() -> usize {
    1_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            recovery_window: None,
            min_samples: default_min_samples(),
            thresholds: AlertThresholds::default(),
            reliability_weight: default_reliability_weight(),
            error_rate_penalty: default_error_rate_penalty(),
            latency_penalty: default_latency_penalty(),
            critical_error_penalty: default_critical_error_penalty(),
            trend_dead_band_pct: default_trend_dead_band_pct(),
            alert_history_limit: default_alert_history_limit(),
            tracked_limit: default_tracked_limit(),
        }
    }
}

/// Extra classifier rule loaded from settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierRuleConfig {
    pub name: String,
    pub strategy: FixStrategy,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub category: Option<ErrorCategory>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default = "default_rule_priority")]
    pub priority: u8,
}

fn default_rule_priority() -> u8 {
    5
}

/// Remediation engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationConfig {
    #[serde(default)]
    pub max_risk_level: RiskLevel,
    #[serde(default = "default_max_parallel_fixes")]
    pub max_parallel_fixes: usize,
    /// Failed remediations of one signature before escalation.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
    #[serde(default = "default_fix_history_limit")]
    pub fix_history_limit: usize,
    /// How long committed rollback payloads stay available for manual undo.
    #[serde(default = "default_rollback_grace_secs")]
    pub rollback_grace_secs: u64,
    #[serde(default)]
    pub rules: Vec<ClassifierRuleConfig>,
}

fn default_max_parallel_fixes() -> usize {
    4
}

fn default_escalation_threshold() -> u32 {
    2
}

fn default_fix_history_limit() -> usize {
    1_000
}

fn default_rollback_grace_secs() -> u64 {
    300
}

/// Upper bound for `rollback_grace_secs` (30 days).
pub const MAX_ROLLBACK_GRACE_SECS: u64 = 30 * 24 * 60 * 60;

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            max_risk_level: RiskLevel::Low,
            max_parallel_fixes: default_max_parallel_fixes(),
            escalation_threshold: default_escalation_threshold(),
            fix_history_limit: default_fix_history_limit(),
            rollback_grace_secs: default_rollback_grace_secs(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSinkKind {
    Stdout,
    Webhook,
    Slack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_enabled_sinks")]
    pub enabled_sinks: Vec<NotificationSinkKind>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    #[serde(default)]
    pub slack_channel: Option<String>,
    #[serde(default = "default_sink_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_dead_letter_limit")]
    pub dead_letter_limit: usize,
}

fn default_enabled_sinks() -> Vec<NotificationSinkKind> {
    vec![NotificationSinkKind::Stdout]
}

fn default_sink_timeout_secs() -> u64 {
    10
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    1_000
}

fn default_dead_letter_limit() -> usize {
    1_000
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled_sinks: default_enabled_sinks(),
            webhook_url: None,
            slack_webhook_url: None,
            slack_channel: None,
            timeout_secs: default_sink_timeout_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            dead_letter_limit: default_dead_letter_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Fixed delay between retry attempts of one unit.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Terminal sessions kept before the oldest are archived away.
    #[serde(default = "default_max_archived_sessions")]
    pub max_archived_sessions: usize,
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_max_archived_sessions() -> usize {
    50
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            max_archived_sessions: default_max_archived_sessions(),
        }
    }
}

/// Daemon-wide settings file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MedicSettings {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub remediation: RemediationConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
}

pub fn parse_test_configuration(contents: &str) -> Result<TestConfiguration, toml::de::Error> {
    toml::from_str(contents)
}

pub fn parse_settings(contents: &str) -> Result<MedicSettings, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_test_configuration(path: impl AsRef<Path>) -> Result<TestConfiguration, ConfigError> {
    let path_ref = path.as_ref();
    let body = read_config(path_ref)?;
    parse_test_configuration(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

pub fn load_settings(path: impl AsRef<Path>) -> Result<MedicSettings, ConfigError> {
    let path_ref = path.as_ref();
    let body = read_config(path_ref)?;
    parse_settings(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

pub fn save_settings(path: impl AsRef<Path>, settings: &MedicSettings) -> Result<(), ConfigError> {
    let path_ref = path.as_ref();
    if let Some(parent_dir) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent_dir).map_err(|source| ConfigError::CreateDir {
            path: parent_dir.to_path_buf(),
            source,
        })?;
    }

    let body = toml::to_string_pretty(settings).map_err(|source| ConfigError::Serialize {
        path: path_ref.to_path_buf(),
        source,
    })?;
    fs::write(path_ref, body).map_err(|source| ConfigError::Write {
        path: path_ref.to_path_buf(),
        source,
    })?;
    Ok(())
}

pub(crate) fn read_config(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}
