//! Alert and monitoring snapshot types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AlertId, ErrorCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ErrorRate,
    Latency,
    ResourceUsage,
    CriticalError,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::ErrorRate => "error_rate",
            AlertKind::Latency => "latency",
            AlertKind::ResourceUsage => "resource_usage",
            AlertKind::CriticalError => "critical_error",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Deduplication key: one active alert per (kind, source, target).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertKey {
    pub kind: AlertKind,
    pub source: String,
    #[serde(default)]
    pub target: Option<String>,
}

impl AlertKey {
    pub fn new(kind: AlertKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Key used for critical-error alerts on one (component, category) pair.
    pub fn critical_error(component: &str, category: ErrorCategory) -> Self {
        Self::new(AlertKind::CriticalError, component).with_target(category.as_str())
    }
}

impl std::fmt::Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}:{}:{}", self.kind, self.source, target),
            None => write!(f, "{}:{}", self.kind, self.source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub key: AlertKey,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub first_seen: DateTime<Utc>,
    /// Timestamp of the most recent breach.
    pub last_seen: DateTime<Utc>,
    pub occurrences: u64,
    pub acknowledged: bool,
    pub resolved: bool,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// What happened to an alert as the result of one recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertEventKind {
    Raised,
    /// An already-active alert saw another breach.
    Refreshed,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertEventKind,
    pub alert: Alert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl HealthStatus {
    /// `>= 90` healthy, `>= 70` degraded, `>= 30` unhealthy, else critical.
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            HealthStatus::Healthy
        } else if score >= 70.0 {
            HealthStatus::Degraded
        } else if score >= 30.0 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Critical => "critical",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Execution progress as observed by the monitoring sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub total: u64,
    pub completed: u64,
    pub passed: u64,
    pub failed: u64,
    pub errored: u64,
    pub skipped: u64,
}

impl ExecutionProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSnapshot {
    pub taken_at: DateTime<Utc>,
    pub progress: ExecutionProgress,
    /// Passed share of windowed non-skipped results, in percent.
    pub pass_rate: f64,
    /// Failed or errored share of windowed non-skipped results, in percent.
    pub error_rate: f64,
    pub error_trend: Trend,
    pub latency: Percentiles,
    #[serde(default)]
    pub resource_usage_pct: Option<f64>,
    pub unresolved_critical: u32,
    pub active_alerts: usize,
    pub health_score: f64,
    pub status: HealthStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_boundaries() {
        assert_eq!(HealthStatus::from_score(100.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(90.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(89.9), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(70.0), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(69.0), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::from_score(30.0), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::from_score(29.9), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(0.0), HealthStatus::Critical);
    }

    #[test]
    fn alert_key_display_includes_target() {
        let key = AlertKey::new(AlertKind::ResourceUsage, "aggregate").with_target("memory");
        assert_eq!(key.to_string(), "resource_usage:aggregate:memory");

        let key = AlertKey::critical_error("db", ErrorCategory::Integration);
        assert_eq!(key.to_string(), "critical_error:db:integration");
    }

    #[test]
    fn progress_percent_handles_empty_total() {
        let progress = ExecutionProgress::default();
        assert_eq!(progress.percent(), 0.0);

        let progress = ExecutionProgress {
            total: 4,
            completed: 1,
            ..ExecutionProgress::default()
        };
        assert_eq!(progress.percent(), 25.0);
    }
}
