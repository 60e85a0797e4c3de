use futures::future::BoxFuture;
use medic_core::{CheckOutcome, ErrorEntry, FixStrategy, RollbackPayload, ValidationCheck};

use crate::error::RemedyError;

/// The system a repair acts on.
///
/// `restore` must write absolute values taken from the payload so that
/// restoring the same payload twice is indistinguishable from restoring it once.
pub trait RepairTarget: Send + Sync {
    /// Snapshot the settings `strategy` would touch. `Ok(None)` means the
    /// strategy has nothing restorable.
    fn capture<'a>(
        &'a self,
        strategy: FixStrategy,
        error: &'a ErrorEntry,
    ) -> BoxFuture<'a, Result<Option<RollbackPayload>, RemedyError>>;

    /// Perform the repair. Returns a one-line summary of what changed.
    fn apply<'a>(
        &'a self,
        strategy: FixStrategy,
        error: &'a ErrorEntry,
    ) -> BoxFuture<'a, Result<String, RemedyError>>;

    fn check<'a>(
        &'a self,
        strategy: FixStrategy,
        check: ValidationCheck,
        error: &'a ErrorEntry,
    ) -> BoxFuture<'a, Result<CheckOutcome, RemedyError>>;

    fn restore<'a>(&'a self, payload: &'a RollbackPayload) -> BoxFuture<'a, Result<(), RemedyError>>;
}
