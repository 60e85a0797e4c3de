//! Strategy catalog: risk tier, validation checks and rollback capability.

use medic_core::{FixStrategy, RiskLevel, ValidationCheck};

/// Static description of one repair strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategySpec {
    pub strategy: FixStrategy,
    pub risk: RiskLevel,
    /// Every check must pass for the repair to commit. The first one is the
    /// strategy's primary condition.
    pub checks: &'static [ValidationCheck],
    pub captures_rollback: bool,
    pub description: &'static str,
}

pub fn strategy_spec(strategy: FixStrategy) -> StrategySpec {
    use ValidationCheck::*;

    let (checks, captures_rollback, description): (&'static [ValidationCheck], bool, &str) =
        match strategy {
            FixStrategy::NavigationConfig => (
                &[RouteResolves, FailureNoLongerReproduces],
                true,
                "add a fallback for the broken route",
            ),
            FixStrategy::ElementInteraction => (
                &[ElementInteractable, FailureNoLongerReproduces],
                true,
                "extend the selector wait budget",
            ),
            FixStrategy::InputValidation => (
                &[InputAccepted, FailureNoLongerReproduces],
                true,
                "relax the validation rule for the rejected field",
            ),
            FixStrategy::ConnectionPool => (
                &[PoolHasHeadroom, FailureNoLongerReproduces],
                true,
                "grow the connection pool and shorten idle timeout",
            ),
            FixStrategy::Schema => (
                &[SchemaMatches, FailureNoLongerReproduces],
                true,
                "add the missing column",
            ),
            FixStrategy::Index => (
                &[QueryWithinBudget, FailureNoLongerReproduces],
                true,
                "create an index on the slow table",
            ),
            FixStrategy::ServiceRestart => (
                &[ServiceHealthy, FailureNoLongerReproduces],
                true,
                "restart the service workers",
            ),
            FixStrategy::Network => (
                &[EndpointReachable, FailureNoLongerReproduces],
                true,
                "raise network timeout and retry budget",
            ),
            FixStrategy::ResourceReclaim => (
                &[ResourceBelowThreshold],
                false,
                "drop caches to reclaim memory",
            ),
        };

    StrategySpec {
        strategy,
        risk: strategy.intrinsic_risk(),
        checks,
        captures_rollback,
        description,
    }
}

pub fn catalog() -> Vec<StrategySpec> {
    FixStrategy::ALL.into_iter().map(strategy_spec).collect()
}
