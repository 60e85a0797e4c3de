//! Remediation pipeline: classify → risk gate → snapshot → apply → validate →
//! commit or rollback.

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use medic_core::{
    CheckOutcome, ErrorContext, ErrorEntry, FixId, FixRecord, FixStatus, FixStrategy,
    RemediationConfig, RiskLevel, RollbackPayload, SessionId, Severity, SkipReason,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::catalog::strategy_spec;
use crate::classifier::{Classification, Classifier};
use crate::error::RemedyError;
use crate::escalation::EscalationLedger;
use crate::locks::TargetLocks;
use crate::target::RepairTarget;

/// Output of one `remediate` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemediationReport {
    /// One record per input error, in input order.
    pub records: Vec<FixRecord>,
    /// Critical errors produced by failed rollbacks.
    pub raised_errors: Vec<ErrorEntry>,
}

impl RemediationReport {
    pub fn committed(&self) -> impl Iterator<Item = &FixRecord> {
        self.records.iter().filter(|record| record.is_committed())
    }

    /// Copy fix outcomes onto the errors they were produced for.
    pub fn annotate(&self, errors: &mut [ErrorEntry]) {
        for entry in errors.iter_mut() {
            if let Some(record) = self.records.iter().find(|r| r.error_id == entry.id) {
                entry.fix_applied = record.fix_applied;
                entry.fix_summary = Some(record.summary.clone());
            }
        }
    }
}

pub struct RemediationEngine {
    config: RemediationConfig,
    classifier: Classifier,
    target: Arc<dyn RepairTarget>,
    locks: TargetLocks,
    permits: Semaphore,
    ledger: Mutex<EscalationLedger>,
    history: Mutex<VecDeque<FixRecord>>,
}

impl RemediationEngine {
    pub fn new(config: RemediationConfig, target: Arc<dyn RepairTarget>) -> Self {
        Self {
            classifier: Classifier::with_rules(&config.rules),
            locks: TargetLocks::new(),
            permits: Semaphore::new(config.max_parallel_fixes.max(1)),
            ledger: Mutex::new(EscalationLedger::new(config.escalation_threshold)),
            history: Mutex::new(VecDeque::new()),
            target,
            config,
        }
    }

    pub fn config(&self) -> &RemediationConfig {
        &self.config
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    fn ledger(&self) -> MutexGuard<'_, EscalationLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history_guard(&self) -> MutexGuard<'_, VecDeque<FixRecord>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remediate under the configured risk ceiling.
    pub async fn remediate(&self, batch: &[ErrorEntry]) -> RemediationReport {
        self.remediate_with_limit(batch, self.config.max_risk_level)
            .await
    }

    /// Remediate a batch. Every error yields exactly one record; no failure
    /// of one error stops the rest of the batch.
    pub async fn remediate_with_limit(
        &self,
        batch: &[ErrorEntry],
        max_risk: RiskLevel,
    ) -> RemediationReport {
        let outcomes = join_all(batch.iter().map(|entry| self.fix_one(entry, max_risk))).await;

        let mut report = RemediationReport::default();
        for (record, raised) in outcomes {
            report.records.push(record);
            report.raised_errors.extend(raised);
        }

        self.store_history(&report.records);
        report
    }

    async fn fix_one(
        &self,
        entry: &ErrorEntry,
        max_risk: RiskLevel,
    ) -> (FixRecord, Option<ErrorEntry>) {
        let mut record = new_record(entry);

        if !entry.auto_fixable {
            return (
                finish(record, FixStatus::Skipped(SkipReason::NotAutoFixable), "error is not auto-fixable"),
                None,
            );
        }

        let Some(classification) = self.classifier.classify(entry) else {
            info!(error_id = %entry.id, target = %record.target, "no repair strategy matches error");
            return (
                finish(record, FixStatus::Unclassified, "no repair strategy matches this error"),
                None,
            );
        };
        let Classification { strategy, risk, .. } = classification;
        record.strategy = Some(strategy);
        record.risk_level = Some(risk);

        if !risk.permitted_by(max_risk) {
            info!(
                error_id = %entry.id,
                strategy = %strategy,
                risk = %risk,
                max = %max_risk,
                "repair skipped: risk above limit"
            );
            let summary = format!("{strategy} repair is {risk} risk; limit is {max_risk}");
            return (
                finish(
                    record,
                    FixStatus::Skipped(SkipReason::RiskAboveLimit { risk, max: max_risk }),
                    summary,
                ),
                None,
            );
        }

        let _target_guard = self.locks.acquire(&record.target).await;

        if let Some(failed_attempts) = self
            .ledger()
            .escalated(entry.session_id.as_ref(), &record.signature)
        {
            warn!(
                error_id = %entry.id,
                signature = %record.signature,
                failed_attempts,
                "repeated failure escalated instead of auto-fixed"
            );
            let summary = format!("escalated after {failed_attempts} failed repairs");
            return (
                finish(record, FixStatus::Escalated { failed_attempts }, summary),
                None,
            );
        }

        let _permit = self.permits.acquire().await.ok();
        let (record, raised) = self.run_repair(record, entry, strategy, risk).await;

        if record.status.is_remediation_failure() {
            self.ledger()
                .record_failure(entry.session_id.as_ref(), &record.signature);
        } else if record.is_committed() {
            self.ledger()
                .record_success(entry.session_id.as_ref(), &record.signature);
        }
        (record, raised)
    }

    /// Snapshot, apply, validate and commit or roll back. Caller holds the target lock.
    async fn run_repair(
        &self,
        mut record: FixRecord,
        entry: &ErrorEntry,
        strategy: FixStrategy,
        risk: RiskLevel,
    ) -> (FixRecord, Option<ErrorEntry>) {
        let spec = strategy_spec(strategy);

        let payload = if spec.captures_rollback {
            match self.target.capture(strategy, entry).await {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error_id = %entry.id, strategy = %strategy, error = %err, "rollback capture failed");
                    None
                }
            }
        } else {
            None
        };
        record.backup_captured = payload.is_some();

        if payload.is_none() && risk > RiskLevel::Low {
            return (
                finish(
                    record,
                    FixStatus::Skipped(SkipReason::NoRollbackAvailable),
                    format!("no rollback payload for {risk} risk {strategy} repair"),
                ),
                None,
            );
        }

        record.apply_started_at = Some(Utc::now());
        let applied = self.target.apply(strategy, entry).await;
        record.apply_finished_at = Some(Utc::now());

        let apply_summary = match applied {
            Ok(summary) => summary,
            Err(err) => {
                warn!(error_id = %entry.id, strategy = %strategy, error = %err, "repair apply failed");
                if let Some(payload) = &payload {
                    if let Err(restore_err) = self.target.restore(payload).await {
                        let reason = format!("apply failed: {err}; rollback failed: {restore_err}");
                        error!(
                            error_id = %entry.id,
                            strategy = %strategy,
                            %reason,
                            "restore after failed apply also failed"
                        );
                        let raised = rollback_failure_error(entry, &record, strategy, &reason);
                        return (
                            finish(record, FixStatus::RollbackFailed { reason: reason.clone() }, reason),
                            Some(raised),
                        );
                    }
                }
                let reason = err.to_string();
                return (
                    finish(record, FixStatus::ApplyFailed { reason: reason.clone() }, reason),
                    None,
                );
            }
        };

        let mut checks = Vec::with_capacity(spec.checks.len());
        for check in spec.checks {
            let outcome = match self.target.check(strategy, *check, entry).await {
                Ok(outcome) => outcome,
                Err(err) => CheckOutcome {
                    check: *check,
                    passed: false,
                    detail: Some(err.to_string()),
                },
            };
            checks.push(outcome);
        }
        record.checks = checks;

        if record.validation_passed() {
            info!(
                fix_id = %record.id,
                strategy = %strategy,
                target = %record.target,
                "repair committed"
            );
            record.fix_applied = true;
            record.rollback = payload;
            return (finish(record, FixStatus::Committed, apply_summary), None);
        }

        let failed: Vec<&str> = record
            .checks
            .iter()
            .filter(|outcome| !outcome.passed)
            .map(|outcome| outcome.check.as_str())
            .collect();
        let reason = format!("validation failed: {}", failed.join(", "));

        match payload {
            Some(payload) => match self.target.restore(&payload).await {
                Ok(()) => {
                    warn!(fix_id = %record.id, strategy = %strategy, %reason, "repair rolled back");
                    (finish(record, FixStatus::RolledBack { reason: reason.clone() }, reason), None)
                }
                Err(err) => {
                    let reason = format!("{reason}; rollback failed: {err}");
                    error!(fix_id = %record.id, strategy = %strategy, %reason, "rollback failed");
                    let raised = rollback_failure_error(entry, &record, strategy, &reason);
                    (
                        finish(record, FixStatus::RollbackFailed { reason: reason.clone() }, reason),
                        Some(raised),
                    )
                }
            },
            None if !spec.captures_rollback => {
                let reason = format!("{reason}; {strategy} has nothing to restore");
                warn!(fix_id = %record.id, strategy = %strategy, %reason, "repair not effective");
                (finish(record, FixStatus::RolledBack { reason: reason.clone() }, reason), None)
            }
            None => {
                let reason = format!("{reason}; no rollback payload was captured");
                error!(fix_id = %record.id, strategy = %strategy, %reason, "repair cannot be undone");
                let raised = rollback_failure_error(entry, &record, strategy, &reason);
                (
                    finish(record, FixStatus::RollbackFailed { reason: reason.clone() }, reason),
                    Some(raised),
                )
            }
        }
    }

    /// Undo a committed repair while its rollback payload is still retained.
    pub async fn rollback(&self, fix_id: &FixId) -> Result<FixRecord, RemedyError> {
        let target = {
            let mut history = self.history_guard();
            expire_payloads(&mut history, self.config.rollback_grace_secs);
            let record = history
                .iter()
                .find(|record| &record.id == fix_id)
                .ok_or_else(|| RemedyError::FixNotFound {
                    fix_id: fix_id.clone(),
                })?;
            record.target.clone()
        };

        let _target_guard = self.locks.acquire(&target).await;

        let payload = {
            let mut history = self.history_guard();
            expire_payloads(&mut history, self.config.rollback_grace_secs);
            let record = history
                .iter()
                .find(|record| &record.id == fix_id)
                .ok_or_else(|| RemedyError::FixNotFound {
                    fix_id: fix_id.clone(),
                })?;
            rollback_payload(record)?
        };

        self.target.restore(&payload).await?;

        let mut history = self.history_guard();
        let record = history
            .iter_mut()
            .find(|record| &record.id == fix_id)
            .ok_or_else(|| RemedyError::FixNotFound {
                fix_id: fix_id.clone(),
            })?;
        record.status = FixStatus::RolledBack {
            reason: "manual rollback".to_string(),
        };
        record.fix_applied = false;
        record.rollback = None;
        record.finished_at = Utc::now();
        info!(fix_id = %fix_id, target = %record.target, "repair rolled back on request");
        Ok(record.clone())
    }

    /// All retained records, oldest first.
    pub fn history(&self) -> Vec<FixRecord> {
        let mut history = self.history_guard();
        expire_payloads(&mut history, self.config.rollback_grace_secs);
        history.iter().cloned().collect()
    }

    pub fn history_for_session(&self, session_id: &SessionId) -> Vec<FixRecord> {
        self.history()
            .into_iter()
            .filter(|record| record.session_id.as_ref() == Some(session_id))
            .collect()
    }

    /// Drop escalation counts for a finished session.
    pub fn forget_session(&self, session_id: &SessionId) {
        self.ledger().forget_session(session_id);
    }

    fn store_history(&self, records: &[FixRecord]) {
        let limit = self.config.fix_history_limit;
        if limit == 0 {
            return;
        }
        let mut history = self.history_guard();
        for record in records {
            if history.len() == limit {
                history.pop_front();
            }
            history.push_back(record.clone());
        }
        expire_payloads(&mut history, self.config.rollback_grace_secs);
    }
}

fn rollback_payload(record: &FixRecord) -> Result<RollbackPayload, RemedyError> {
    let unavailable = |reason: &str| RemedyError::RollbackUnavailable {
        fix_id: record.id.clone(),
        reason: reason.to_string(),
    };
    if !record.is_committed() {
        return Err(unavailable("repair is not committed"));
    }
    record
        .rollback
        .clone()
        .ok_or_else(|| unavailable("rollback payload is gone or expired"))
}

/// Drop rollback payloads older than the grace period. A grace period past
/// the representable range never expires.
fn expire_payloads(history: &mut VecDeque<FixRecord>, grace_secs: u64) {
    let Some(grace) = i64::try_from(grace_secs)
        .ok()
        .and_then(ChronoDuration::try_seconds)
    else {
        return;
    };
    let now = Utc::now();
    for record in history.iter_mut() {
        let expired = record
            .finished_at
            .checked_add_signed(grace)
            .is_some_and(|deadline| deadline <= now);
        if record.rollback.is_some() && expired {
            record.rollback = None;
        }
    }
}

fn new_record(entry: &ErrorEntry) -> FixRecord {
    let now = Utc::now();
    FixRecord {
        id: FixId::generate(),
        error_id: entry.id.clone(),
        session_id: entry.session_id.clone(),
        target: entry.target(),
        signature: entry.signature(),
        strategy: None,
        risk_level: None,
        backup_captured: false,
        rollback: None,
        checks: Vec::new(),
        status: FixStatus::Unclassified,
        fix_applied: false,
        summary: String::new(),
        started_at: now,
        apply_started_at: None,
        apply_finished_at: None,
        finished_at: now,
    }
}

fn finish(mut record: FixRecord, status: FixStatus, summary: impl Into<String>) -> FixRecord {
    if status != FixStatus::Committed {
        record.fix_applied = false;
        record.rollback = None;
    }
    record.status = status;
    record.summary = summary.into();
    record.finished_at = Utc::now();
    record
}

fn rollback_failure_error(
    entry: &ErrorEntry,
    record: &FixRecord,
    strategy: FixStrategy,
    reason: &str,
) -> ErrorEntry {
    let mut fields = BTreeMap::new();
    fields.insert("fix_id".to_string(), record.id.to_string());
    fields.insert("error_id".to_string(), entry.id.to_string());
    fields.insert("strategy".to_string(), strategy.to_string());

    let mut raised = ErrorEntry::new(
        Severity::Critical,
        entry.category,
        entry.component.clone(),
        format!("rollback of {strategy} repair failed: {reason}"),
    )
    .with_context(ErrorContext::Generic { fields })
    .auto_fixable(false);
    raised.session_id = entry.session_id.clone();
    raised
}
