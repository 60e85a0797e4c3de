//! Self-healing remediation: classify detected errors, apply bounded-risk
//! repairs, validate them and roll back what does not hold.

pub mod catalog;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod locks;
pub mod store;
pub mod target;

pub use catalog::{catalog, strategy_spec, StrategySpec};
pub use classifier::{Classification, Classifier, ClassifierRule};
pub use engine::{RemediationEngine, RemediationReport};
pub use error::RemedyError;
pub use escalation::EscalationLedger;
pub use locks::TargetLocks;
pub use store::{ComponentDemand, ComponentSettings, ComponentState, ComponentStore, FaultInjection};
pub use target::RepairTarget;

#[cfg(test)]
mod tests {
    use super::{Classifier, ComponentStore, RemediationEngine, RemediationReport, RemedyError};
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_public_api() {
        let _ = TypeId::of::<Classifier>();
        let _ = TypeId::of::<ComponentStore>();
        let _ = TypeId::of::<RemediationEngine>();
        let _ = TypeId::of::<RemediationReport>();
        let _ = TypeId::of::<RemedyError>();
    }
}
