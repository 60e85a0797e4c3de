use medic_core::FixTarget;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per (component, category) target.
///
/// Holding the guard for the whole snapshot → apply → validate → commit or
/// rollback sequence serializes repairs on the same target.
#[derive(Debug, Default)]
pub struct TargetLocks {
    locks: Mutex<HashMap<FixTarget, Arc<AsyncMutex<()>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, target: &FixTarget) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(target.clone()).or_default())
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medic_core::ErrorCategory;
    use std::time::Duration;

    fn target(component: &str) -> FixTarget {
        FixTarget {
            component: component.to_string(),
            category: ErrorCategory::Integration,
        }
    }

    #[tokio::test]
    async fn same_target_waits_for_release() {
        let locks = Arc::new(TargetLocks::new());
        let guard = locks.acquire(&target("db")).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(&target("db")).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.expect("waiter completes");
    }

    #[tokio::test]
    async fn disjoint_targets_do_not_block() {
        let locks = TargetLocks::new();
        let _db = locks.acquire(&target("db")).await;
        let _cache = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&target("cache")))
            .await
            .expect("disjoint target is free");
        assert_eq!(locks.len(), 2);
    }
}
