use medic_core::SessionId;
use std::collections::HashMap;

/// Failed-remediation counts per (session, failure signature).
///
/// Once a signature has failed `threshold` times in a session, further
/// attempts are escalated instead of auto-fixed.
#[derive(Debug, Clone)]
pub struct EscalationLedger {
    threshold: u32,
    failures: HashMap<(Option<SessionId>, String), u32>,
}

impl EscalationLedger {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: HashMap::new(),
        }
    }

    pub fn failures(&self, session: Option<&SessionId>, signature: &str) -> u32 {
        self.failures
            .get(&(session.cloned(), signature.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Failure count when the signature is escalated, else `None`.
    pub fn escalated(&self, session: Option<&SessionId>, signature: &str) -> Option<u32> {
        let failures = self.failures(session, signature);
        (failures >= self.threshold).then_some(failures)
    }

    pub fn record_failure(&mut self, session: Option<&SessionId>, signature: &str) -> u32 {
        let count = self
            .failures
            .entry((session.cloned(), signature.to_string()))
            .or_insert(0);
        *count += 1;
        *count
    }

    /// A committed repair resets the count for its signature.
    pub fn record_success(&mut self, session: Option<&SessionId>, signature: &str) {
        self.failures.remove(&(session.cloned(), signature.to_string()));
    }

    pub fn forget_session(&mut self, session: &SessionId) {
        self.failures
            .retain(|(owner, _), _| owner.as_ref() != Some(session));
    }
}
