//! Map alert, session and remediation outcomes to notifications.

use chrono::Utc;
use medic_core::{
    AlertEvent, AlertEventKind, AlertSeverity, FixRecord, FixStatus, SessionState, SessionSummary,
};

use crate::types::{NotificationMessage, NotificationSeverity, NotificationTopic};

/// Raised alerts notify at their own severity and cleared alerts as info.
/// Refreshes of an already-active alert are not re-notified.
pub fn notification_for_alert(event: &AlertEvent) -> Option<NotificationMessage> {
    let alert = &event.alert;
    match event.kind {
        AlertEventKind::Raised => Some(NotificationMessage {
            at: Utc::now(),
            topic: NotificationTopic::AlertRaised,
            severity: match alert.severity {
                AlertSeverity::Info => NotificationSeverity::Info,
                AlertSeverity::Warning => NotificationSeverity::Warning,
                AlertSeverity::Critical => NotificationSeverity::Error,
            },
            title: alert.title.clone(),
            body: alert.message.clone(),
            session_id: None,
            source: Some(alert.key.source.clone()),
        }),
        AlertEventKind::Cleared => Some(NotificationMessage {
            at: Utc::now(),
            topic: NotificationTopic::AlertCleared,
            severity: NotificationSeverity::Info,
            title: format!("Resolved: {}", alert.title),
            body: format!(
                "{} cleared after {} occurrence(s)",
                alert.key, alert.occurrences
            ),
            session_id: None,
            source: Some(alert.key.source.clone()),
        }),
        AlertEventKind::Refreshed => None,
    }
}

/// Map a terminal session summary. Non-terminal sessions produce nothing.
pub fn notification_for_session(summary: &SessionSummary) -> Option<NotificationMessage> {
    let progress = &summary.progress;
    let counts = format!(
        "{} passed, {} failed, {} errored, {} skipped of {}; fixes: {} committed, {} rolled back, {} skipped",
        progress.passed,
        progress.failed,
        progress.errored,
        progress.skipped,
        progress.total,
        summary.fixes_committed,
        summary.fixes_rolled_back,
        summary.fixes_skipped,
    );

    let (topic, severity, title, body) = match summary.state {
        SessionState::Completed => (
            NotificationTopic::SessionCompleted,
            if summary.has_failures() {
                NotificationSeverity::Warning
            } else {
                NotificationSeverity::Info
            },
            format!("Session {} completed", summary.config_id),
            counts,
        ),
        SessionState::Cancelled => (
            NotificationTopic::SessionCancelled,
            NotificationSeverity::Warning,
            format!("Session {} cancelled", summary.config_id),
            counts,
        ),
        SessionState::Failed => (
            NotificationTopic::SessionFailed,
            NotificationSeverity::Error,
            format!("Session {} failed", summary.config_id),
            match &summary.failure_reason {
                Some(reason) => format!("{reason}; {counts}"),
                None => counts,
            },
        ),
        SessionState::Created | SessionState::Running | SessionState::Draining => return None,
    };

    Some(NotificationMessage {
        at: Utc::now(),
        topic,
        severity,
        title,
        body,
        session_id: Some(summary.session_id.clone()),
        source: Some(summary.environment.clone()),
    })
}

/// Failed rollbacks and escalations need a human; other outcomes stay quiet.
pub fn notification_for_fix(record: &FixRecord) -> Option<NotificationMessage> {
    let (topic, severity, title) = match &record.status {
        FixStatus::RollbackFailed { .. } => (
            NotificationTopic::RemediationFailed,
            NotificationSeverity::Error,
            format!("Rollback failed on {}", record.target),
        ),
        FixStatus::Escalated { failed_attempts } => (
            NotificationTopic::RemediationEscalated,
            NotificationSeverity::Warning,
            format!(
                "Repair escalated on {} after {failed_attempts} failures",
                record.target
            ),
        ),
        _ => return None,
    };

    Some(NotificationMessage {
        at: Utc::now(),
        topic,
        severity,
        title,
        body: record.summary.clone(),
        session_id: record.session_id.clone(),
        source: Some(record.target.component.clone()),
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use medic_core::{
        Alert, AlertEvent, AlertEventKind, AlertId, AlertKey, AlertKind, AlertSeverity,
        ErrorCategory, ExecutionProgress, FixId, FixRecord, FixStatus, FixTarget, ErrorId,
        SessionId, SessionState, SessionSummary,
    };

    use super::{notification_for_alert, notification_for_fix, notification_for_session};
    use crate::types::{NotificationSeverity, NotificationTopic};

    fn alert_event(kind: AlertEventKind, severity: AlertSeverity) -> AlertEvent {
        let now = Utc::now();
        AlertEvent {
            kind,
            alert: Alert {
                id: AlertId::new("A1"),
                key: AlertKey::new(AlertKind::ErrorRate, "aggregate"),
                severity,
                title: "Error rate above threshold".to_string(),
                message: "error rate 40.0% exceeds 10.0%".to_string(),
                first_seen: now,
                last_seen: now,
                occurrences: 3,
                acknowledged: false,
                resolved: kind == AlertEventKind::Cleared,
                resolved_at: None,
            },
        }
    }

    fn summary(state: SessionState) -> SessionSummary {
        SessionSummary {
            session_id: SessionId::new("S1"),
            config_id: "checkout".to_string(),
            environment: "staging".to_string(),
            state,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            progress: ExecutionProgress {
                total: 4,
                completed: 4,
                passed: 4,
                ..ExecutionProgress::default()
            },
            errors_detected: 0,
            fixes_committed: 0,
            fixes_rolled_back: 0,
            fixes_skipped: 0,
            failure_reason: None,
        }
    }

    fn fix_record(status: FixStatus) -> FixRecord {
        let now = Utc::now();
        FixRecord {
            id: FixId::new("F1"),
            error_id: ErrorId::new("E1"),
            session_id: Some(SessionId::new("S1")),
            target: FixTarget {
                component: "db".to_string(),
                category: ErrorCategory::Integration,
            },
            signature: "db|integration|pool exhausted".to_string(),
            strategy: None,
            risk_level: None,
            backup_captured: false,
            rollback: None,
            checks: Vec::new(),
            status,
            fix_applied: false,
            summary: "restore refused".to_string(),
            started_at: now,
            apply_started_at: None,
            apply_finished_at: None,
            finished_at: now,
        }
    }

    #[test]
    fn raised_critical_alert_maps_to_error_notification() {
        let message = notification_for_alert(&alert_event(
            AlertEventKind::Raised,
            AlertSeverity::Critical,
        ))
        .expect("raised alert notifies");
        assert_eq!(message.topic, NotificationTopic::AlertRaised);
        assert_eq!(message.severity, NotificationSeverity::Error);
        assert_eq!(message.source.as_deref(), Some("aggregate"));
    }

    #[test]
    fn cleared_alert_maps_to_info_and_refresh_is_silent() {
        let cleared = notification_for_alert(&alert_event(
            AlertEventKind::Cleared,
            AlertSeverity::Warning,
        ))
        .expect("cleared alert notifies");
        assert_eq!(cleared.topic, NotificationTopic::AlertCleared);
        assert_eq!(cleared.severity, NotificationSeverity::Info);
        assert!(cleared.title.starts_with("Resolved:"));

        let refreshed = alert_event(AlertEventKind::Refreshed, AlertSeverity::Warning);
        assert!(notification_for_alert(&refreshed).is_none());
    }

    #[test]
    fn session_outcomes_map_by_state() {
        let done = notification_for_session(&summary(SessionState::Completed))
            .expect("completed notifies");
        assert_eq!(done.topic, NotificationTopic::SessionCompleted);
        assert_eq!(done.severity, NotificationSeverity::Info);
        assert!(done.body.contains("4 passed"));

        let mut failing = summary(SessionState::Completed);
        failing.progress.failed = 1;
        let message = notification_for_session(&failing).expect("completed notifies");
        assert_eq!(message.severity, NotificationSeverity::Warning);

        let mut failed = summary(SessionState::Failed);
        failed.failure_reason = Some("probe registry missing suite".to_string());
        let message = notification_for_session(&failed).expect("failed notifies");
        assert_eq!(message.severity, NotificationSeverity::Error);
        assert!(message.body.starts_with("probe registry missing suite"));

        assert!(notification_for_session(&summary(SessionState::Running)).is_none());
    }

    #[test]
    fn only_rollback_failures_and_escalations_notify() {
        let failed = notification_for_fix(&fix_record(FixStatus::RollbackFailed {
            reason: "restore refused".to_string(),
        }))
        .expect("rollback failure notifies");
        assert_eq!(failed.topic, NotificationTopic::RemediationFailed);
        assert_eq!(failed.session_id, Some(SessionId::new("S1")));

        let escalated = notification_for_fix(&fix_record(FixStatus::Escalated {
            failed_attempts: 2,
        }))
        .expect("escalation notifies");
        assert_eq!(escalated.severity, NotificationSeverity::Warning);

        assert!(notification_for_fix(&fix_record(FixStatus::Committed)).is_none());
    }
}
