//! Session lifecycle transitions.

use chrono::{DateTime, Utc};
use medic_core::SessionState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("invalid session state transition: {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
}

/// Move `state` to `to`, returning the recorded transition.
pub fn transition_session(
    state: &mut SessionState,
    to: SessionState,
    at: DateTime<Utc>,
) -> Result<StateTransition, StateMachineError> {
    let from = *state;
    if !is_transition_allowed(from, to) {
        return Err(StateMachineError::InvalidTransition { from, to });
    }
    *state = to;
    Ok(StateTransition { from, to, at })
}

/// ```text
/// Created → Running → Completed
///    │         ├────→ Failed
///    │         ├────→ Cancelled
///    │         └────→ Draining → Cancelled
///    │                   └────→ Failed
///    └──→ Cancelled | Failed
/// ```
///
/// No state is re-enterable, including itself.
pub fn is_transition_allowed(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;

    matches!(
        (from, to),
        (Created, Running)
            | (Created, Cancelled)
            | (Created, Failed)
            | (Running, Draining)
            | (Running, Completed)
            | (Running, Cancelled)
            | (Running, Failed)
            | (Draining, Cancelled)
            | (Draining, Failed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionState; 6] = [
        SessionState::Created,
        SessionState::Running,
        SessionState::Draining,
        SessionState::Completed,
        SessionState::Cancelled,
        SessionState::Failed,
    ];

    #[test]
    fn allows_normal_flow() {
        assert!(is_transition_allowed(SessionState::Created, SessionState::Running));
        assert!(is_transition_allowed(SessionState::Running, SessionState::Completed));
        assert!(is_transition_allowed(SessionState::Running, SessionState::Draining));
        assert!(is_transition_allowed(SessionState::Draining, SessionState::Cancelled));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in ALL.into_iter().filter(SessionState::is_terminal) {
            for to in ALL {
                assert!(!is_transition_allowed(from, to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn no_state_reenters_itself() {
        for state in ALL {
            assert!(!is_transition_allowed(state, state));
        }
    }

    #[test]
    fn draining_cannot_complete() {
        assert!(!is_transition_allowed(SessionState::Draining, SessionState::Completed));
        assert!(!is_transition_allowed(SessionState::Draining, SessionState::Running));
    }

    #[test]
    fn transition_updates_state() {
        let mut state = SessionState::Created;
        let at = Utc::now();
        let transition =
            transition_session(&mut state, SessionState::Running, at).expect("valid transition");
        assert_eq!(transition.from, SessionState::Created);
        assert_eq!(transition.to, SessionState::Running);
        assert_eq!(state, SessionState::Running);
    }

    #[test]
    fn transition_rejects_invalid() {
        let mut state = SessionState::Completed;
        let err = transition_session(&mut state, SessionState::Running, Utc::now())
            .expect_err("completed is terminal");
        assert_eq!(
            err,
            StateMachineError::InvalidTransition {
                from: SessionState::Completed,
                to: SessionState::Running,
            }
        );
        assert_eq!(state, SessionState::Completed);
    }
}
