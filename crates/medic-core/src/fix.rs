//! Remediation records: strategies, risk tiers, rollback payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{ErrorId, FixId, FixTarget, SessionId};

/// How invasive and reversible a repair is. Ordered `Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    /// Whether a repair of this risk may run under the given ceiling.
    pub fn permitted_by(self, max: RiskLevel) -> bool {
        self <= max
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(format!(
                "invalid risk level '{other}'. valid values: low, medium, high"
            )),
        }
    }
}

/// The finite set of repair strategies the remediation engine knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    NavigationConfig,
    ElementInteraction,
    InputValidation,
    ConnectionPool,
    Schema,
    Index,
    ServiceRestart,
    Network,
    ResourceReclaim,
}

impl FixStrategy {
    pub const ALL: [FixStrategy; 9] = [
        FixStrategy::NavigationConfig,
        FixStrategy::ElementInteraction,
        FixStrategy::InputValidation,
        FixStrategy::ConnectionPool,
        FixStrategy::Schema,
        FixStrategy::Index,
        FixStrategy::ServiceRestart,
        FixStrategy::Network,
        FixStrategy::ResourceReclaim,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FixStrategy::NavigationConfig => "navigation_config",
            FixStrategy::ElementInteraction => "element_interaction",
            FixStrategy::InputValidation => "input_validation",
            FixStrategy::ConnectionPool => "connection_pool",
            FixStrategy::Schema => "schema",
            FixStrategy::Index => "index",
            FixStrategy::ServiceRestart => "service_restart",
            FixStrategy::Network => "network",
            FixStrategy::ResourceReclaim => "resource_reclaim",
        }
    }

    /// Intrinsic risk of the strategy.
    pub fn intrinsic_risk(self) -> RiskLevel {
        match self {
            FixStrategy::NavigationConfig
            | FixStrategy::ElementInteraction
            | FixStrategy::InputValidation
            | FixStrategy::ResourceReclaim => RiskLevel::Low,
            FixStrategy::ConnectionPool | FixStrategy::Index | FixStrategy::Network => {
                RiskLevel::Medium
            }
            FixStrategy::Schema | FixStrategy::ServiceRestart => RiskLevel::High,
        }
    }
}

impl std::fmt::Display for FixStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FixStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase().replace('-', "_");
        FixStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| format!("invalid fix strategy '{value}'"))
    }
}

/// Snapshot of the settings a repair touches, sufficient to undo it.
///
/// Every variant stores absolute prior values, so restoring twice lands on the
/// same state as restoring once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackPayload {
    NavigationConfig {
        component: String,
        route_fallbacks: BTreeMap<String, String>,
    },
    ElementInteraction {
        component: String,
        selector_wait_ms: u64,
    },
    InputValidation {
        component: String,
        validation_rules: BTreeMap<String, String>,
    },
    ConnectionPool {
        component: String,
        pool_size: u32,
        idle_timeout_ms: u64,
    },
    Schema {
        component: String,
        columns: BTreeSet<String>,
    },
    Index {
        component: String,
        indexes: BTreeSet<String>,
    },
    ServiceRestart {
        component: String,
        workers: u32,
        restarts: u32,
    },
    Network {
        component: String,
        timeout_ms: u64,
        retries: u32,
    },
}

impl RollbackPayload {
    pub fn component(&self) -> &str {
        match self {
            RollbackPayload::NavigationConfig { component, .. }
            | RollbackPayload::ElementInteraction { component, .. }
            | RollbackPayload::InputValidation { component, .. }
            | RollbackPayload::ConnectionPool { component, .. }
            | RollbackPayload::Schema { component, .. }
            | RollbackPayload::Index { component, .. }
            | RollbackPayload::ServiceRestart { component, .. }
            | RollbackPayload::Network { component, .. } => component,
        }
    }

    pub fn strategy(&self) -> FixStrategy {
        match self {
            RollbackPayload::NavigationConfig { .. } => FixStrategy::NavigationConfig,
            RollbackPayload::ElementInteraction { .. } => FixStrategy::ElementInteraction,
            RollbackPayload::InputValidation { .. } => FixStrategy::InputValidation,
            RollbackPayload::ConnectionPool { .. } => FixStrategy::ConnectionPool,
            RollbackPayload::Schema { .. } => FixStrategy::Schema,
            RollbackPayload::Index { .. } => FixStrategy::Index,
            RollbackPayload::ServiceRestart { .. } => FixStrategy::ServiceRestart,
            RollbackPayload::Network { .. } => FixStrategy::Network,
        }
    }
}

/// Post-fix checks. Each strategy declares the exact set it must pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCheck {
    /// Re-run the condition that produced the error.
    FailureNoLongerReproduces,
    RouteResolves,
    ElementInteractable,
    InputAccepted,
    PoolHasHeadroom,
    SchemaMatches,
    QueryWithinBudget,
    ServiceHealthy,
    EndpointReachable,
    ResourceBelowThreshold,
}

impl ValidationCheck {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationCheck::FailureNoLongerReproduces => "failure_no_longer_reproduces",
            ValidationCheck::RouteResolves => "route_resolves",
            ValidationCheck::ElementInteractable => "element_interactable",
            ValidationCheck::InputAccepted => "input_accepted",
            ValidationCheck::PoolHasHeadroom => "pool_has_headroom",
            ValidationCheck::SchemaMatches => "schema_matches",
            ValidationCheck::QueryWithinBudget => "query_within_budget",
            ValidationCheck::ServiceHealthy => "service_healthy",
            ValidationCheck::EndpointReachable => "endpoint_reachable",
            ValidationCheck::ResourceBelowThreshold => "resource_below_threshold",
        }
    }
}

impl std::fmt::Display for ValidationCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check: ValidationCheck,
    pub passed: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Strategy risk is above the configured ceiling.
    RiskAboveLimit { risk: RiskLevel, max: RiskLevel },
    /// No rollback payload could be captured and the strategy is above low risk.
    NoRollbackAvailable,
    /// The error was marked as not auto-fixable by its producer.
    NotAutoFixable,
}

/// Final state of one remediation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FixStatus {
    Committed,
    RolledBack { reason: String },
    /// Validation failed and the rollback itself failed.
    RollbackFailed { reason: String },
    ApplyFailed { reason: String },
    Skipped(SkipReason),
    /// Repeated identical failure; reported instead of auto-fixed again.
    Escalated { failed_attempts: u32 },
    Unclassified,
}

impl FixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixStatus::Committed => "committed",
            FixStatus::RolledBack { .. } => "rolled_back",
            FixStatus::RollbackFailed { .. } => "rollback_failed",
            FixStatus::ApplyFailed { .. } => "apply_failed",
            FixStatus::Skipped(_) => "skipped",
            FixStatus::Escalated { .. } => "escalated",
            FixStatus::Unclassified => "unclassified",
        }
    }

    /// Whether the attempt counts as a failed remediation for escalation.
    pub fn is_remediation_failure(&self) -> bool {
        matches!(
            self,
            FixStatus::RolledBack { .. }
                | FixStatus::RollbackFailed { .. }
                | FixStatus::ApplyFailed { .. }
        )
    }
}

impl std::fmt::Display for FixStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the remediation engine for one error entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecord {
    pub id: FixId,
    pub error_id: ErrorId,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub target: FixTarget,
    pub signature: String,
    pub strategy: Option<FixStrategy>,
    pub risk_level: Option<RiskLevel>,
    pub backup_captured: bool,
    /// Retained only while the record is rollback-capable.
    #[serde(default)]
    pub rollback: Option<RollbackPayload>,
    #[serde(default)]
    pub checks: Vec<CheckOutcome>,
    pub status: FixStatus,
    /// True only while the repair remains in effect (committed).
    pub fix_applied: bool,
    pub summary: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub apply_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub apply_finished_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl FixRecord {
    pub fn is_committed(&self) -> bool {
        self.status == FixStatus::Committed
    }

    pub fn validation_passed(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(|check| check.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::Medium.permitted_by(RiskLevel::Medium));
        assert!(RiskLevel::Low.permitted_by(RiskLevel::High));
        assert!(!RiskLevel::High.permitted_by(RiskLevel::Low));
    }

    #[test]
    fn risk_level_parses_and_rejects_unknown() {
        assert_eq!("MEDIUM".parse::<RiskLevel>(), Ok(RiskLevel::Medium));
        let err = "extreme".parse::<RiskLevel>().expect_err("unknown level");
        assert!(err.contains("valid values"));
    }

    #[test]
    fn strategy_risk_table() {
        assert_eq!(FixStrategy::ConnectionPool.intrinsic_risk(), RiskLevel::Medium);
        assert_eq!(FixStrategy::ServiceRestart.intrinsic_risk(), RiskLevel::High);
        assert_eq!(FixStrategy::Schema.intrinsic_risk(), RiskLevel::High);
        assert_eq!(FixStrategy::ResourceReclaim.intrinsic_risk(), RiskLevel::Low);
    }

    #[test]
    fn strategy_parses_from_kebab_or_snake_case() {
        assert_eq!(
            "connection-pool".parse::<FixStrategy>(),
            Ok(FixStrategy::ConnectionPool)
        );
        assert_eq!(
            "service_restart".parse::<FixStrategy>(),
            Ok(FixStrategy::ServiceRestart)
        );
        assert!("reboot".parse::<FixStrategy>().is_err());
    }

    #[test]
    fn payload_reports_component_and_strategy() {
        let payload = RollbackPayload::ConnectionPool {
            component: "db".to_string(),
            pool_size: 10,
            idle_timeout_ms: 30_000,
        };
        assert_eq!(payload.component(), "db");
        assert_eq!(payload.strategy(), FixStrategy::ConnectionPool);

        let encoded = serde_json::to_value(&payload).expect("serialize payload");
        assert_eq!(encoded["kind"], "connection_pool");
    }

    #[test]
    fn remediation_failure_statuses() {
        assert!(FixStatus::RolledBack {
            reason: "x".to_string()
        }
        .is_remediation_failure());
        assert!(!FixStatus::Committed.is_remediation_failure());
        assert!(!FixStatus::Skipped(SkipReason::NotAutoFixable).is_remediation_failure());
        assert!(!FixStatus::Escalated { failed_attempts: 2 }.is_remediation_failure());
    }

    #[test]
    fn skipped_status_serializes_reason() {
        let status = FixStatus::Skipped(SkipReason::RiskAboveLimit {
            risk: RiskLevel::High,
            max: RiskLevel::Low,
        });
        let encoded = serde_json::to_value(&status).expect("serialize status");
        assert_eq!(encoded["status"], "skipped");
        assert_eq!(encoded["reason"], "risk_above_limit");
        assert_eq!(encoded["risk"], "high");
    }
}
