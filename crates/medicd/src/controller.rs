//! Session controller: validates configurations, sequences suites by
//! dependency, bounds unit concurrency and drives each session through its
//! lifecycle.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use medic_core::{
    first_error, AlertEvent, ControllerConfig, ErrorEntry, ExecutionProgress, FixRecord,
    FixStatus, ResultDetails, SessionId, SessionState, SessionSummary, TestConfiguration,
    TestResult, TestStatus, UnitId, Validate, ValidationIssue, ValidationLevel,
};
use medic_monitor::{AggregationError, Aggregator};
use medic_notify::{
    notification_for_alert, notification_for_fix, notification_for_session,
    NotificationDispatcher, NotificationMessage,
};
use medic_remedy::RemediationEngine;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dependency_graph::SuiteGraph;
use crate::probe::{Probe, ProbeContext};
use crate::runner::{run_unit, UnitOutcome, UnitPolicy};
use crate::state_machine::{transition_session, StateMachineError, StateTransition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
    /// Stable dotted issue code.
    pub code: String,
}

impl From<&ValidationIssue> for ValidationError {
    fn from(issue: &ValidationIssue) -> Self {
        Self {
            field: issue.field.to_string(),
            reason: issue.message.clone(),
            code: issue.code.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationError),
    #[error("session not found: {session_id}")]
    NotFound { session_id: SessionId },
    #[error("session {session_id} is still {state}")]
    NotTerminal {
        session_id: SessionId,
        state: SessionState,
    },
    #[error("controller is shut down")]
    ShutDown,
}

/// Probes available to sessions, keyed by suite id.
#[derive(Clone, Default)]
pub struct SuiteRegistry {
    suites: HashMap<String, Vec<Arc<dyn Probe>>>,
}

impl SuiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a suite, appending to any probes already registered for it.
    pub fn register(&mut self, suite_id: impl Into<String>, probes: Vec<Arc<dyn Probe>>) {
        self.suites.entry(suite_id.into()).or_default().extend(probes);
    }

    pub fn add_probe(&mut self, suite_id: impl Into<String>, probe: Arc<dyn Probe>) {
        self.suites.entry(suite_id.into()).or_default().push(probe);
    }

    pub fn contains(&self, suite_id: &str) -> bool {
        self.suites.contains_key(suite_id)
    }

    pub fn probes(&self, suite_id: &str) -> &[Arc<dyn Probe>] {
        self.suites.get(suite_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn suite_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.suites.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for SuiteRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units: HashMap<&str, usize> = self
            .suites
            .iter()
            .map(|(id, probes)| (id.as_str(), probes.len()))
            .collect();
        f.debug_struct("SuiteRegistry").field("units", &units).finish()
    }
}

/// Shared services a session reports into.
#[derive(Clone)]
pub struct Collaborators {
    pub aggregator: Arc<Aggregator>,
    pub engine: Option<Arc<RemediationEngine>>,
    pub dispatcher: Option<Arc<NotificationDispatcher>>,
}

impl Collaborators {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self {
            aggregator,
            engine: None,
            dispatcher: None,
        }
    }

    pub fn with_engine(mut self, engine: Arc<RemediationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub total: u64,
    pub queued: u64,
    pub running: u64,
    pub passed: u64,
    pub failed: u64,
    pub errored: u64,
    pub skipped: u64,
}

impl SessionProgress {
    pub fn completed(&self) -> u64 {
        self.passed + self.failed + self.errored + self.skipped
    }

    fn settle(&mut self, status: TestStatus) {
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Errored => self.errored += 1,
            TestStatus::Skipped => self.skipped += 1,
        }
    }

    fn to_execution(self) -> ExecutionProgress {
        ExecutionProgress {
            total: self.total,
            completed: self.completed(),
            passed: self.passed,
            failed: self.failed,
            errored: self.errored,
            skipped: self.skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub state: SessionState,
    pub progress: SessionProgress,
    /// Most recently dispatched unit still in flight.
    pub current_unit: Option<UnitId>,
    pub estimated_remaining_ms: Option<u64>,
}

struct SessionInner {
    state: SessionState,
    transitions: Vec<StateTransition>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    progress: SessionProgress,
    running: Vec<UnitId>,
    results: Vec<TestResult>,
    errors: Vec<ErrorEntry>,
    fix_records: Vec<FixRecord>,
    failure_reason: Option<String>,
    settled_duration_ms: u64,
}

struct Session {
    id: SessionId,
    config: Arc<TestConfiguration>,
    inner: Mutex<SessionInner>,
    cancel: watch::Sender<bool>,
    state_tx: watch::Sender<SessionState>,
}

impl Session {
    fn new(id: SessionId, config: Arc<TestConfiguration>, total: u64) -> Self {
        let (cancel, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(SessionState::Created);
        Self {
            id,
            config,
            inner: Mutex::new(SessionInner {
                state: SessionState::Created,
                transitions: Vec::new(),
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                progress: SessionProgress {
                    total,
                    queued: total,
                    ..SessionProgress::default()
                },
                running: Vec::new(),
                results: Vec::new(),
                errors: Vec::new(),
                fix_records: Vec::new(),
                failure_reason: None,
                settled_duration_ms: 0,
            }),
            cancel,
            state_tx,
        }
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn state(&self) -> SessionState {
        self.inner().state
    }

    fn transition_locked(
        &self,
        inner: &mut SessionInner,
        to: SessionState,
    ) -> Result<StateTransition, StateMachineError> {
        let at = Utc::now();
        let transition = transition_session(&mut inner.state, to, at)?;
        inner.transitions.push(transition);
        if to == SessionState::Running {
            inner.started_at = Some(at);
        }
        if to.is_terminal() {
            inner.finished_at = Some(at);
        }
        self.state_tx.send_replace(to);
        info!(
            session_id = %self.id,
            from = %transition.from,
            to = %transition.to,
            "session state changed"
        );
        Ok(transition)
    }

    fn transition(&self, to: SessionState) -> Result<StateTransition, StateMachineError> {
        let mut inner = self.inner();
        self.transition_locked(&mut inner, to)
    }

    /// Request cooperative cancellation. Returns false when the session was
    /// already past the point of cancelling.
    fn request_cancel(&self) -> bool {
        let mut inner = self.inner();
        let next = match inner.state {
            SessionState::Created => SessionState::Cancelled,
            SessionState::Running => SessionState::Draining,
            _ => return false,
        };
        self.cancel.send_replace(true);
        if let Err(err) = self.transition_locked(&mut inner, next) {
            warn!(session_id = %self.id, error = %err, "cancel transition rejected");
        }
        true
    }

    /// Move to the terminal state the session has earned.
    fn settle(&self) -> Option<SessionState> {
        let mut inner = self.inner();
        let to = match inner.state {
            SessionState::Running => SessionState::Completed,
            SessionState::Draining => SessionState::Cancelled,
            _ => return None,
        };
        self.transition_locked(&mut inner, to).ok().map(|t| t.to)
    }

    fn fail(&self, reason: String) {
        let mut inner = self.inner();
        if inner.state.is_terminal() {
            return;
        }
        error!(session_id = %self.id, reason = %reason, "session failed");
        inner.failure_reason = Some(reason);
        self.cancel.send_replace(true);
        if let Err(err) = self.transition_locked(&mut inner, SessionState::Failed) {
            warn!(session_id = %self.id, error = %err, "fail transition rejected");
        }
    }

    fn unit_dispatched(&self, unit_id: UnitId) {
        let mut inner = self.inner();
        inner.progress.queued = inner.progress.queued.saturating_sub(1);
        inner.progress.running += 1;
        inner.running.push(unit_id);
    }

    /// Append a settled unit. Returns false when the result arrived after
    /// cancellation and was discarded.
    fn unit_settled(&self, result: &TestResult) -> bool {
        let mut inner = self.inner();
        inner.progress.running = inner.progress.running.saturating_sub(1);
        if let Some(pos) = inner.running.iter().position(|id| *id == result.id) {
            inner.running.remove(pos);
        }
        if inner.state != SessionState::Running {
            return false;
        }
        inner.progress.settle(result.status);
        inner.settled_duration_ms = inner.settled_duration_ms.saturating_add(result.duration_ms);
        inner.results.push(result.clone());
        true
    }

    fn unit_skipped(&self, result: TestResult) {
        let mut inner = self.inner();
        inner.progress.queued = inner.progress.queued.saturating_sub(1);
        inner.progress.settle(result.status);
        inner.results.push(result);
    }

    fn record_errors(&self, errors: Vec<ErrorEntry>) {
        self.inner().errors.extend(errors);
    }

    fn record_fixes(&self, records: Vec<FixRecord>) {
        self.inner().fix_records.extend(records);
    }

    fn status(&self) -> SessionStatus {
        let inner = self.inner();
        let progress = inner.progress;
        let completed = progress.completed();
        let estimated_remaining_ms = if inner.state.is_terminal() {
            Some(0)
        } else if completed == 0 {
            None
        } else {
            let average = inner.settled_duration_ms / completed;
            let remaining = progress.total.saturating_sub(completed);
            let lanes = self.config.concurrency_level.max(1) as u64;
            Some(average.saturating_mul(remaining.div_ceil(lanes)))
        };
        SessionStatus {
            session_id: self.id.clone(),
            state: inner.state,
            progress,
            current_unit: inner.running.last().cloned(),
            estimated_remaining_ms,
        }
    }

    fn summary(&self) -> SessionSummary {
        let inner = self.inner();
        let mut committed = 0;
        let mut rolled_back = 0;
        let mut skipped = 0;
        for record in &inner.fix_records {
            match record.status {
                FixStatus::Committed => committed += 1,
                FixStatus::RolledBack { .. } | FixStatus::RollbackFailed { .. } => {
                    rolled_back += 1
                }
                FixStatus::ApplyFailed { .. } => {}
                FixStatus::Skipped(_) | FixStatus::Escalated { .. } | FixStatus::Unclassified => {
                    skipped += 1
                }
            }
        }
        SessionSummary {
            session_id: self.id.clone(),
            config_id: self.config.id.clone(),
            environment: self.config.environment.clone(),
            state: inner.state,
            created_at: inner.created_at,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
            progress: inner.progress.to_execution(),
            errors_detected: inner.errors.len() as u64,
            fixes_committed: committed,
            fixes_rolled_back: rolled_back,
            fixes_skipped: skipped,
            failure_reason: inner.failure_reason.clone(),
        }
    }
}

#[derive(Default)]
struct ControllerState {
    sessions: HashMap<SessionId, Arc<Session>>,
    archived: VecDeque<SessionSummary>,
}

pub struct SessionController {
    registry: Arc<SuiteRegistry>,
    collaborators: Collaborators,
    config: ControllerConfig,
    state: Mutex<ControllerState>,
    shut_down: AtomicBool,
}

impl SessionController {
    pub fn new(
        registry: SuiteRegistry,
        collaborators: Collaborators,
        config: ControllerConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            collaborators,
            config,
            state: Mutex::new(ControllerState::default()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &SuiteRegistry {
        &self.registry
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self, id: &SessionId) -> Result<Arc<Session>, ControllerError> {
        self.state()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound {
                session_id: id.clone(),
            })
    }

    /// All issues for `config`, including suites missing from the registry
    /// and dependency cycles.
    pub fn validation_issues(&self, config: &TestConfiguration) -> Vec<ValidationIssue> {
        let mut issues = config.validate();
        for suite in &config.suites {
            if !suite.id.is_empty() && !self.registry.contains(&suite.id) {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "config.suites.unknown",
                    field: "suites",
                    message: format!("suite `{}` has no registered units", suite.id),
                });
            }
        }
        if let Some(path) = SuiteGraph::build(&config.suites).find_cycle() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "config.suites.cycle",
                field: "suites",
                message: format!("dependency cycle: {}", path.join(" -> ")),
            });
        }
        issues
    }

    pub fn validate(&self, config: &TestConfiguration) -> Result<(), ValidationError> {
        let issues = self.validation_issues(config);
        match first_error(&issues) {
            Some(issue) => Err(issue.into()),
            None => Ok(()),
        }
    }

    /// Validate, create and start a session. Must be called from inside a
    /// tokio runtime. The session is already `Running` when this returns.
    pub fn start(&self, config: TestConfiguration) -> Result<SessionId, ControllerError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ControllerError::ShutDown);
        }
        self.validate(&config)?;

        let graph = SuiteGraph::build(&config.suites);
        let order = graph.topological_order().map_err(|err| ValidationError {
            field: "suites".to_string(),
            reason: err.to_string(),
            code: "config.suites.cycle".to_string(),
        })?;
        let total: u64 = order
            .iter()
            .map(|suite| self.registry.probes(suite).len() as u64)
            .sum();

        let id = SessionId::generate();
        let session = Arc::new(Session::new(id.clone(), Arc::new(config), total));
        {
            let mut state = self.state();
            self.prune_locked(&mut state);
            state.sessions.insert(id.clone(), Arc::clone(&session));
        }

        let aggregator = &self.collaborators.aggregator;
        aggregator.set_progress(total);
        if let Some(thresholds) = session.config.thresholds {
            aggregator.update_thresholds(thresholds);
        }

        if let Err(err) = session.transition(SessionState::Running) {
            session.fail(err.to_string());
            return Ok(id);
        }
        info!(
            session_id = %id,
            config_id = %session.config.id,
            suites = order.len(),
            units = total,
            concurrency = session.config.concurrency_level,
            "session started"
        );

        let driver = SessionDriver {
            policy: UnitPolicy::from_config(&session.config, &self.config),
            session: Arc::clone(&session),
            graph,
            order,
            registry: Arc::clone(&self.registry),
            reporter: SessionReporter {
                session: Arc::clone(&session),
                collaborators: self.collaborators.clone(),
            },
        };
        tokio::spawn(async move {
            let handle = tokio::spawn(driver.run());
            if let Err(err) = handle.await {
                session.fail(format!("session driver crashed: {err}"));
            }
        });
        Ok(id)
    }

    pub fn status(&self, id: &SessionId) -> Result<SessionStatus, ControllerError> {
        Ok(self.session(id)?.status())
    }

    /// Request cancellation. Cancelling a session that already finished is a
    /// no-op.
    pub fn cancel(&self, id: &SessionId) -> Result<(), ControllerError> {
        let session = self.session(id)?;
        if session.request_cancel() {
            info!(session_id = %id, "session cancellation requested");
        }
        Ok(())
    }

    pub fn results(&self, id: &SessionId) -> Result<Vec<TestResult>, ControllerError> {
        Ok(self.session(id)?.inner().results.clone())
    }

    pub fn fix_records(&self, id: &SessionId) -> Result<Vec<FixRecord>, ControllerError> {
        Ok(self.session(id)?.inner().fix_records.clone())
    }

    pub fn errors(&self, id: &SessionId) -> Result<Vec<ErrorEntry>, ControllerError> {
        Ok(self.session(id)?.inner().errors.clone())
    }

    pub fn transitions(&self, id: &SessionId) -> Result<Vec<StateTransition>, ControllerError> {
        Ok(self.session(id)?.inner().transitions.clone())
    }

    /// Non-terminal sessions, oldest first.
    pub fn list_active_sessions(&self) -> Vec<SessionStatus> {
        let sessions: Vec<Arc<Session>> = self.state().sessions.values().cloned().collect();
        let mut active: Vec<(DateTime<Utc>, SessionStatus)> = sessions
            .iter()
            .filter(|session| !session.state().is_terminal())
            .map(|session| {
                let created_at = session.inner().created_at;
                (created_at, session.status())
            })
            .collect();
        active.sort_by_key(|(created_at, _)| *created_at);
        active.into_iter().map(|(_, status)| status).collect()
    }

    /// Summary of a live or archived session.
    pub fn summary(&self, id: &SessionId) -> Result<SessionSummary, ControllerError> {
        let state = self.state();
        if let Some(session) = state.sessions.get(id) {
            return Ok(session.summary());
        }
        state
            .archived
            .iter()
            .find(|summary| summary.session_id == *id)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound {
                session_id: id.clone(),
            })
    }

    pub fn archived_sessions(&self) -> Vec<SessionSummary> {
        self.state().archived.iter().cloned().collect()
    }

    /// Resolves with the final summary once the session is terminal.
    pub async fn wait(&self, id: &SessionId) -> Result<SessionSummary, ControllerError> {
        let session = self.session(id)?;
        let mut rx = session.state_tx.subscribe();
        loop {
            let terminal = rx.borrow_and_update().is_terminal();
            if terminal || rx.changed().await.is_err() {
                break;
            }
        }
        Ok(session.summary())
    }

    /// Drop a terminal session's live state, keeping only its summary.
    pub fn archive(&self, id: &SessionId) -> Result<SessionSummary, ControllerError> {
        let mut state = self.state();
        let session = state
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound {
                session_id: id.clone(),
            })?;
        let current = session.state();
        if !current.is_terminal() {
            return Err(ControllerError::NotTerminal {
                session_id: id.clone(),
                state: current,
            });
        }
        Ok(self.archive_locked(&mut state, &session))
    }

    fn archive_locked(&self, state: &mut ControllerState, session: &Session) -> SessionSummary {
        state.sessions.remove(&session.id);
        let summary = session.summary();
        state.archived.push_back(summary.clone());
        while state.archived.len() > self.config.max_archived_sessions {
            state.archived.pop_front();
        }
        if let Some(engine) = &self.collaborators.engine {
            engine.forget_session(&session.id);
        }
        debug!(session_id = %session.id, "session archived");
        summary
    }

    /// Archive the oldest terminal sessions beyond the retention limit.
    fn prune_locked(&self, state: &mut ControllerState) {
        let mut finished: Vec<Arc<Session>> = state
            .sessions
            .values()
            .filter(|session| session.state().is_terminal())
            .cloned()
            .collect();
        if finished.len() <= self.config.max_archived_sessions {
            return;
        }
        finished.sort_by_key(|session| session.inner().finished_at);
        let excess = finished.len() - self.config.max_archived_sessions;
        for session in finished.iter().take(excess) {
            self.archive_locked(state, session);
        }
    }

    /// Refuse new sessions, cancel the running ones and wait for them to
    /// settle.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let sessions: Vec<Arc<Session>> = self.state().sessions.values().cloned().collect();
        for session in &sessions {
            session.request_cancel();
        }
        for session in &sessions {
            if let Err(err) = self.wait(&session.id).await {
                debug!(session_id = %session.id, error = %err, "session vanished during shutdown");
            }
        }
        info!(sessions = sessions.len(), "controller shut down");
    }
}

struct SessionDriver {
    session: Arc<Session>,
    graph: SuiteGraph,
    order: Vec<String>,
    registry: Arc<SuiteRegistry>,
    reporter: SessionReporter,
    policy: UnitPolicy,
}

impl SessionDriver {
    async fn run(self) {
        let mut failed_suites: HashSet<String> = HashSet::new();
        let mut repairs: JoinSet<()> = JoinSet::new();

        for suite_id in &self.order {
            if self.session.is_cancelled() {
                break;
            }
            if self.session.config.skip_dependents_on_failure {
                let blocked_by = self
                    .graph
                    .parents_of(suite_id)
                    .into_iter()
                    .find(|parent| failed_suites.contains(parent));
                if let Some(parent) = blocked_by {
                    self.skip_suite(suite_id, &parent);
                    failed_suites.insert(suite_id.clone());
                    continue;
                }
            }
            if self.run_suite(suite_id, &mut repairs).await {
                failed_suites.insert(suite_id.clone());
            }
        }

        // Fix records must be final before the session turns terminal.
        while let Some(joined) = repairs.join_next().await {
            if let Err(err) = joined {
                error!(session_id = %self.session.id, error = %err, "repair task lost");
            }
        }

        if let Some(state) = self.session.settle() {
            let summary = self.session.summary();
            info!(
                session_id = %self.session.id,
                state = %state,
                passed = summary.progress.passed,
                failed = summary.progress.failed,
                errored = summary.progress.errored,
                skipped = summary.progress.skipped,
                "session finished"
            );
            if let Some(message) = notification_for_session(&summary) {
                self.reporter.notify(message);
            }
        }
    }

    /// Returns whether any unit of the suite failed or errored. Repairs for
    /// the suite's errors are spawned onto `repairs` and may outlive it.
    async fn run_suite(&self, suite_id: &str, repairs: &mut JoinSet<()>) -> bool {
        let mut queue: VecDeque<Arc<dyn Probe>> =
            self.registry.probes(suite_id).iter().cloned().collect();
        info!(
            session_id = %self.session.id,
            suite_id = %suite_id,
            units = queue.len(),
            "suite started"
        );

        let permits = Arc::new(Semaphore::new(self.session.config.concurrency_level.max(1)));
        let mut in_flight: JoinSet<UnitOutcome> = JoinSet::new();
        let mut failed = false;

        loop {
            while !self.session.is_cancelled() && !queue.is_empty() {
                let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                    break;
                };
                let Some(probe) = queue.pop_front() else {
                    break;
                };
                let unit_id = UnitId::new(probe.id());
                let ctx = ProbeContext::new(
                    self.session.id.clone(),
                    suite_id,
                    unit_id.clone(),
                    self.session.cancel.subscribe(),
                );
                self.session.unit_dispatched(unit_id);
                let policy = self.policy;
                in_flight.spawn(async move {
                    let _permit = permit;
                    run_unit(probe, ctx, &policy).await
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            match joined {
                Ok(outcome) => {
                    let (unit_failed, pending) = self.absorb(outcome);
                    failed |= unit_failed;
                    if let Some(errors) = pending {
                        let reporter = self.reporter.clone();
                        repairs.spawn(reporter.remediate(errors));
                    }
                }
                Err(err) => error!(
                    session_id = %self.session.id,
                    suite_id = %suite_id,
                    error = %err,
                    "unit task lost"
                ),
            }
        }

        if !queue.is_empty() {
            debug!(
                session_id = %self.session.id,
                suite_id = %suite_id,
                undispatched = queue.len(),
                "suite stopped by cancellation"
            );
        }
        failed
    }

    fn skip_suite(&self, suite_id: &str, failed_parent: &str) {
        let reason = format!("dependency {failed_parent} failed");
        warn!(
            session_id = %self.session.id,
            suite_id = %suite_id,
            dependency = %failed_parent,
            "skipping suite"
        );
        for probe in self.registry.probes(suite_id) {
            let result = TestResult::new(
                UnitId::new(probe.id()),
                suite_id,
                probe.name(),
                TestStatus::Skipped,
                0,
            )
            .with_message(reason.clone())
            .with_details(ResultDetails::Skipped {
                reason: reason.clone(),
            });
            self.reporter
                .forward(self.reporter.collaborators.aggregator.record_result(&result));
            self.session.unit_skipped(result);
        }
    }

    /// Record a settled unit. Returns whether the unit failed, plus the errors
    /// still waiting for remediation when auto-fix is on.
    fn absorb(&self, outcome: UnitOutcome) -> (bool, Option<Vec<ErrorEntry>>) {
        let UnitOutcome {
            result,
            errors,
            samples,
        } = outcome;
        let failed = result.is_failure();

        if !self.session.unit_settled(&result) {
            debug!(
                session_id = %self.session.id,
                unit_id = %result.id,
                "discarding result settled after cancellation"
            );
            return (failed, None);
        }

        let aggregator = &self.reporter.collaborators.aggregator;
        self.reporter.forward(aggregator.record_result(&result));
        for sample in &samples {
            self.reporter.forward(aggregator.record_sample(sample));
        }

        let session_id = self.session.id.clone();
        let mut errors: Vec<ErrorEntry> = errors
            .into_iter()
            .map(|entry| entry.with_session(session_id.clone()))
            .collect();
        if errors.is_empty() {
            errors.extend(
                ErrorEntry::from_failed_result(&result)
                    .map(|entry| entry.with_session(session_id.clone())),
            );
        }
        if errors.is_empty() {
            return (failed, None);
        }
        for entry in &errors {
            self.reporter.forward(aggregator.record_error(entry));
        }

        if self.session.config.auto_fix_enabled && self.reporter.collaborators.engine.is_some() {
            return (failed, Some(errors));
        }
        self.session.record_errors(errors);
        (failed, None)
    }
}

/// Session-scoped handle for work that runs beside the dispatch loop.
#[derive(Clone)]
struct SessionReporter {
    session: Arc<Session>,
    collaborators: Collaborators,
}

impl SessionReporter {
    /// Run the engine over one unit's errors and record the outcome.
    async fn remediate(self, mut errors: Vec<ErrorEntry>) {
        let Some(engine) = self.collaborators.engine.clone() else {
            self.session.record_errors(errors);
            return;
        };
        let aggregator = &self.collaborators.aggregator;

        let report = engine
            .remediate_with_limit(&errors, self.session.config.max_risk_level)
            .await;
        report.annotate(&mut errors);
        for record in &report.records {
            if record.is_committed() {
                if let Some(event) = aggregator.mark_error_resolved(&record.error_id) {
                    self.forward(Ok(vec![event]));
                }
            }
            if let Some(message) = notification_for_fix(record) {
                self.notify(message);
            }
        }
        for raised in &report.raised_errors {
            self.forward(aggregator.record_error(raised));
        }
        errors.extend(report.raised_errors);
        self.session.record_fixes(report.records);
        self.session.record_errors(errors);
    }

    /// Push alert transitions to the notification sinks. Malformed events
    /// were already logged by the aggregator.
    fn forward(&self, recorded: Result<Vec<AlertEvent>, AggregationError>) {
        let Ok(events) = recorded else {
            return;
        };
        for event in &events {
            if let Some(message) = notification_for_alert(event) {
                self.notify(message);
            }
        }
    }

    fn notify(&self, message: NotificationMessage) {
        let Some(dispatcher) = &self.collaborators.dispatcher else {
            return;
        };
        let dispatcher = Arc::clone(dispatcher);
        let message = message.with_session(self.session.id.clone());
        tokio::task::spawn_blocking(move || {
            for (sink, result) in dispatcher.dispatch(&message) {
                if let Err(err) = result {
                    warn!(sink = ?sink, error = %err, "notification delivery failed");
                }
            }
        });
    }
}
