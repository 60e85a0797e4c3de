//! Session lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::ExecutionProgress;
use crate::types::SessionId;

/// Lifecycle of a test session.
///
/// ```text
/// Created → Running → Completed
///              │  └─→ Failed
///              └─→ Draining → Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Created,
    Running,
    /// Cancellation requested; waiting for dispatched units to settle.
    Draining,
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            SessionState::Created => "CREATED",
            SessionState::Running => "RUNNING",
            SessionState::Draining => "DRAINING",
            SessionState::Completed => "COMPLETED",
            SessionState::Cancelled => "CANCELLED",
            SessionState::Failed => "FAILED",
        };
        f.write_str(tag)
    }
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }

    /// Running, including the draining sub-state.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Running | SessionState::Draining)
    }
}

/// Snapshot of a session handed to reports and notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub config_id: String,
    pub environment: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: ExecutionProgress,
    pub errors_detected: u64,
    pub fixes_committed: u64,
    pub fixes_rolled_back: u64,
    pub fixes_skipped: u64,
    /// Set when the controller itself failed the session.
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl SessionSummary {
    pub fn duration_ms(&self) -> Option<i64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        Some((finished - started).num_milliseconds())
    }

    pub fn has_failures(&self) -> bool {
        self.progress.failed > 0 || self.progress.errored > 0
    }
}
