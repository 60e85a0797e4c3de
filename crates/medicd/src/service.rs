//! Facade bundling the controller with the monitoring, remediation and
//! notification services it reports into.

use std::sync::Arc;

use medic_core::{
    first_error, Alert, AlertEvent, AlertId, ErrorEntry, FixId, FixRecord, MedicSettings,
    MonitoringSnapshot, PerformanceSample, SessionId, TestResult, Validate,
};
use medic_monitor::{AggregationError, Aggregator};
use medic_notify::{notification_for_alert, NotificationDispatcher};
use medic_remedy::{ComponentStore, RemediationEngine, RemedyError, RepairTarget};
use tracing::{info, warn};

use crate::controller::{Collaborators, SessionController, SuiteRegistry, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] ValidationError),
}

pub struct MedicService {
    settings: MedicSettings,
    aggregator: Arc<Aggregator>,
    engine: Arc<RemediationEngine>,
    dispatcher: Arc<NotificationDispatcher>,
    controller: SessionController,
}

impl MedicService {
    pub fn new(
        settings: MedicSettings,
        registry: SuiteRegistry,
        target: Arc<dyn RepairTarget>,
    ) -> Self {
        let aggregator = Arc::new(Aggregator::new(settings.monitor.clone()));
        let engine = Arc::new(RemediationEngine::new(settings.remediation.clone(), target));
        let dispatcher = Arc::new(NotificationDispatcher::from_config(&settings.notifications));
        let collaborators = Collaborators::new(Arc::clone(&aggregator))
            .with_engine(Arc::clone(&engine))
            .with_dispatcher(Arc::clone(&dispatcher));
        let controller =
            SessionController::new(registry, collaborators, settings.controller.clone());

        Self {
            settings,
            aggregator,
            engine,
            dispatcher,
            controller,
        }
    }

    /// Validate `settings` and build the service over an in-memory component
    /// store.
    pub fn init(
        settings: MedicSettings,
        registry: SuiteRegistry,
        store: Arc<ComponentStore>,
    ) -> Result<Self, ServiceError> {
        let issues = settings.validate();
        for issue in issues.iter().filter(|issue| !issue.is_error()) {
            warn!(code = issue.code, field = issue.field, "{}", issue.message);
        }
        if let Some(issue) = first_error(&issues) {
            return Err(ValidationError::from(issue).into());
        }

        let service = Self::new(settings, registry, store);
        info!(
            suites = service.controller.registry().suite_ids().len(),
            sinks = service.dispatcher.sink_kinds().len(),
            "medic service initialized"
        );
        Ok(service)
    }

    pub fn settings(&self) -> &MedicSettings {
        &self.settings
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn engine(&self) -> &Arc<RemediationEngine> {
        &self.engine
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    // --- Ingestion ---

    pub fn append_result(&self, result: &TestResult) -> Result<Vec<AlertEvent>, AggregationError> {
        self.forward(self.aggregator.record_result(result))
    }

    pub fn append_error(&self, entry: &ErrorEntry) -> Result<Vec<AlertEvent>, AggregationError> {
        self.forward(self.aggregator.record_error(entry))
    }

    pub fn append_sample(
        &self,
        sample: &PerformanceSample,
    ) -> Result<Vec<AlertEvent>, AggregationError> {
        self.forward(self.aggregator.record_sample(sample))
    }

    // --- Queries ---

    pub fn snapshot(&self) -> MonitoringSnapshot {
        self.aggregator.snapshot()
    }

    /// Active alerts nobody has acknowledged yet.
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.aggregator.unacknowledged_alerts()
    }

    pub fn acknowledge_alert(&self, id: &AlertId) -> bool {
        self.aggregator.acknowledge(id)
    }

    pub fn resolve_alert(&self, id: &AlertId) -> Option<AlertEvent> {
        let event = self.aggregator.resolve(id)?;
        self.notify(&event);
        Some(event)
    }

    /// Fix history, optionally narrowed to one session.
    pub fn fix_history(&self, session_id: Option<&SessionId>) -> Vec<FixRecord> {
        match session_id {
            Some(session_id) => self.engine.history_for_session(session_id),
            None => self.engine.history(),
        }
    }

    pub async fn rollback_fix(&self, fix_id: &FixId) -> Result<FixRecord, RemedyError> {
        self.engine.rollback(fix_id).await
    }

    // --- Lifecycle ---

    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
        let dead_letters = self.dispatcher.failed_notifications_len();
        if dead_letters > 0 {
            warn!(dead_letters, "undelivered notifications at shutdown");
        }
        info!("medic service stopped");
    }

    fn forward(
        &self,
        recorded: Result<Vec<AlertEvent>, AggregationError>,
    ) -> Result<Vec<AlertEvent>, AggregationError> {
        if let Ok(events) = &recorded {
            for event in events {
                self.notify(event);
            }
        }
        recorded
    }

    fn notify(&self, event: &AlertEvent) {
        let Some(message) = notification_for_alert(event) else {
            return;
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let deliver = move || {
            for (sink, result) in dispatcher.dispatch(&message) {
                if let Err(err) = result {
                    warn!(sink = ?sink, error = %err, "notification delivery failed");
                }
            }
        };
        // Delivery retries sleep; keep them off async worker threads.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(deliver);
            }
            Err(_) => deliver(),
        }
    }
}
