use medic_core::{FixId, FixStrategy};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemedyError {
    #[error("unknown component {component}")]
    UnknownComponent { component: String },
    #[error("failed to capture rollback state for {component}: {reason}")]
    Capture { component: String, reason: String },
    #[error("{strategy} repair on {component} failed: {reason}")]
    Apply {
        strategy: FixStrategy,
        component: String,
        reason: String,
    },
    #[error("validation check on {component} could not run: {reason}")]
    Check { component: String, reason: String },
    #[error("failed to restore {component}: {reason}")]
    Restore { component: String, reason: String },
    #[error("fix record not found: {fix_id}")]
    FixNotFound { fix_id: FixId },
    #[error("fix {fix_id} cannot be rolled back: {reason}")]
    RollbackUnavailable { fix_id: FixId, reason: String },
}
