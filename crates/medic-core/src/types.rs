//! Result and error model shared by every medic component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of one test session run.
    SessionId
);
string_id!(
    /// Identifier of one test unit within a suite.
    UnitId
);
string_id!(ErrorId);
string_id!(AlertId);
string_id!(FixId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Errored,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
            TestStatus::Errored => "errored",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::Errored)
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured payload attached to a test result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultDetails {
    Assertion {
        expected: String,
        actual: String,
    },
    Timeout {
        limit_ms: u64,
    },
    Panic {
        message: String,
    },
    Workflow {
        steps_completed: usize,
        steps_total: usize,
        failed_step: Option<String>,
    },
    Command {
        exit_code: Option<i32>,
        output_tail: String,
    },
    Skipped {
        reason: String,
    },
}

/// Outcome of one test unit. Never mutated after it is appended to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: UnitId,
    pub suite_id: String,
    pub name: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<ResultDetails>,
    /// Number of attempts consumed, including the final one.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

fn default_attempts() -> u32 {
    1
}

impl TestResult {
    pub fn new(
        id: UnitId,
        suite_id: impl Into<String>,
        name: impl Into<String>,
        status: TestStatus,
        duration_ms: u64,
    ) -> Self {
        Self {
            id,
            suite_id: suite_id.into(),
            name: name.into(),
            status,
            duration_ms,
            message: None,
            details: None,
            attempts: 1,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: ResultDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Functional,
    Performance,
    Security,
    Usability,
    Integration,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Functional => "functional",
            ErrorCategory::Performance => "performance",
            ErrorCategory::Security => "security",
            ErrorCategory::Usability => "usability",
            ErrorCategory::Integration => "integration",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "functional" => Ok(ErrorCategory::Functional),
            "performance" => Ok(ErrorCategory::Performance),
            "security" => Ok(ErrorCategory::Security),
            "usability" => Ok(ErrorCategory::Usability),
            "integration" => Ok(ErrorCategory::Integration),
            other => Err(format!(
                "invalid error category '{other}'. valid values: functional, performance, security, usability, integration"
            )),
        }
    }
}

/// Typed context describing where and how a fault was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorContext {
    ConnectionPool { active: u32, max: u32 },
    Latency { observed_ms: f64, threshold_ms: f64 },
    Element { selector: String },
    Route { path: String },
    Input { field: String, value: Option<String> },
    Http { endpoint: String, status: Option<u16> },
    Schema { table: String, column: Option<String> },
    Query { table: String, duration_ms: f64 },
    Resource { resource: String, usage_pct: f64 },
    Network { host: String },
    Service { service: String },
    Generic { fields: BTreeMap<String, String> },
}

/// The (component, category) pair a repair acts on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FixTarget {
    pub component: String,
    pub category: ErrorCategory,
}

impl std::fmt::Display for FixTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.component, self.category)
    }
}

/// A detected fault, distinct from a test result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub id: ErrorId,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub detected_at: DateTime<Utc>,
    pub severity: Severity,
    pub category: ErrorCategory,
    pub component: String,
    pub description: String,
    #[serde(default)]
    pub context: Option<ErrorContext>,
    pub auto_fixable: bool,
    #[serde(default)]
    pub fix_applied: bool,
    #[serde(default)]
    pub fix_summary: Option<String>,
}

impl ErrorEntry {
    pub fn new(
        severity: Severity,
        category: ErrorCategory,
        component: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: ErrorId::generate(),
            session_id: None,
            detected_at: Utc::now(),
            severity,
            category,
            component: component.into(),
            description: description.into(),
            context: None,
            auto_fixable: true,
            fix_applied: false,
            fix_summary: None,
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn auto_fixable(mut self, auto_fixable: bool) -> Self {
        self.auto_fixable = auto_fixable;
        self
    }

    pub fn target(&self) -> FixTarget {
        FixTarget {
            component: self.component.clone(),
            category: self.category,
        }
    }

    /// Stable signature used to recognise repeated identical failures.
    ///
    /// Digits are masked so that counters, ports and durations embedded in the
    /// description do not split one failure into many signatures.
    pub fn signature(&self) -> String {
        let mut normalized = String::with_capacity(self.description.len());
        let mut last_space = false;
        for ch in self.description.chars() {
            if ch.is_ascii_digit() {
                if !normalized.ends_with('#') {
                    normalized.push('#');
                }
                last_space = false;
            } else if ch.is_whitespace() {
                if !last_space {
                    normalized.push(' ');
                }
                last_space = true;
            } else {
                normalized.extend(ch.to_lowercase());
                last_space = false;
            }
        }
        format!(
            "{}|{}|{}",
            self.component,
            self.category,
            normalized.trim()
        )
    }

    /// Derive an error from a failed or errored test result.
    ///
    /// Returns `None` for passing or skipped results.
    pub fn from_failed_result(result: &TestResult) -> Option<Self> {
        if !result.is_failure() {
            return None;
        }

        let (category, severity, context) = match &result.details {
            Some(ResultDetails::Timeout { limit_ms }) => (
                ErrorCategory::Performance,
                Severity::High,
                Some(ErrorContext::Latency {
                    observed_ms: result.duration_ms as f64,
                    threshold_ms: *limit_ms as f64,
                }),
            ),
            Some(ResultDetails::Panic { .. }) => {
                (ErrorCategory::Integration, Severity::High, None)
            }
            _ if result.status == TestStatus::Errored => {
                (ErrorCategory::Integration, Severity::High, None)
            }
            _ => (ErrorCategory::Functional, Severity::Medium, None),
        };

        let description = result
            .message
            .clone()
            .unwrap_or_else(|| format!("unit {} {}", result.name, result.status));

        let mut entry = ErrorEntry::new(severity, category, result.suite_id.clone(), description);
        entry.detected_at = result.recorded_at;
        entry.context = context;
        Some(entry)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SampleMetric {
    /// Response latency of one operation.
    Latency { ms: f64 },
    /// Utilisation of a named resource (cpu, memory, ...), in percent.
    ResourceUsage { resource: String, pct: f64 },
}

/// A raw performance sample reported by a probe or external producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub at: DateTime<Utc>,
    pub source: String,
    pub metric: SampleMetric,
}

impl PerformanceSample {
    pub fn latency(source: impl Into<String>, ms: f64) -> Self {
        Self {
            at: Utc::now(),
            source: source.into(),
            metric: SampleMetric::Latency { ms },
        }
    }

    pub fn resource(source: impl Into<String>, resource: impl Into<String>, pct: f64) -> Self {
        Self {
            at: Utc::now(),
            source: source.into(),
            metric: SampleMetric::ResourceUsage {
                resource: resource.into(),
                pct,
            },
        }
    }
}

/// Anything the monitoring sink accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    Result(TestResult),
    Error(ErrorEntry),
    Sample(PerformanceSample),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_masks_digits_and_whitespace() {
        let a = ErrorEntry::new(
            Severity::High,
            ErrorCategory::Integration,
            "db",
            "Connection  pool exhausted: 20/20 in use",
        );
        let b = ErrorEntry::new(
            Severity::High,
            ErrorCategory::Integration,
            "db",
            "connection pool exhausted: 25/25 in use",
        );
        assert_eq!(a.signature(), b.signature());
        assert_eq!(
            a.signature(),
            "db|integration|connection pool exhausted: #/# in use"
        );
    }

    #[test]
    fn signature_differs_by_target() {
        let a = ErrorEntry::new(Severity::Low, ErrorCategory::Functional, "ui", "broken");
        let b = ErrorEntry::new(Severity::Low, ErrorCategory::Usability, "ui", "broken");
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn timeout_result_becomes_performance_error() {
        let result = TestResult::new(UnitId::new("u1"), "booking", "book ride", TestStatus::Errored, 1200)
            .with_message("timed out after 1000ms")
            .with_details(ResultDetails::Timeout { limit_ms: 1000 });

        let entry = ErrorEntry::from_failed_result(&result).expect("errored result yields error");
        assert_eq!(entry.category, ErrorCategory::Performance);
        assert_eq!(entry.severity, Severity::High);
        assert_eq!(entry.component, "booking");
        assert!(matches!(
            entry.context,
            Some(ErrorContext::Latency { threshold_ms, .. }) if threshold_ms == 1000.0
        ));
    }

    #[test]
    fn failed_assertion_becomes_functional_error() {
        let result = TestResult::new(UnitId::new("u2"), "payments", "charge", TestStatus::Failed, 40);
        let entry = ErrorEntry::from_failed_result(&result).expect("failed result yields error");
        assert_eq!(entry.category, ErrorCategory::Functional);
        assert_eq!(entry.description, "unit charge failed");
    }

    #[test]
    fn passing_result_yields_no_error() {
        let result = TestResult::new(UnitId::new("u3"), "s", "ok", TestStatus::Passed, 1);
        assert!(ErrorEntry::from_failed_result(&result).is_none());
        let skipped = TestResult::new(UnitId::new("u4"), "s", "skip", TestStatus::Skipped, 0);
        assert!(ErrorEntry::from_failed_result(&skipped).is_none());
    }

    #[test]
    fn details_serialize_with_kind_tag() {
        let details = ResultDetails::Timeout { limit_ms: 250 };
        let encoded = serde_json::to_value(&details).expect("serialize details");
        assert_eq!(encoded["kind"], "timeout");
        assert_eq!(encoded["limit_ms"], 250);

        let context = ErrorContext::ConnectionPool { active: 10, max: 10 };
        let encoded = serde_json::to_value(&context).expect("serialize context");
        assert_eq!(encoded["kind"], "connection_pool");
    }

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("Performance".parse::<ErrorCategory>(), Ok(ErrorCategory::Performance));
        assert!("storage".parse::<ErrorCategory>().is_err());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ErrorId::generate(), ErrorId::generate());
        assert_eq!(SessionId::new("S1").to_string(), "S1");
    }
}
