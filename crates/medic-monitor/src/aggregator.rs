//! The monitoring sink: rolling windows, alerts and snapshots.

use chrono::{DateTime, Utc};
use medic_core::{
    Alert, AlertEvent, AlertId, AlertKey, AlertKind, AlertSeverity, AlertThresholds, ErrorEntry,
    ErrorId, ExecutionProgress, FixTarget, HealthStatus, MonitorConfig, MonitorEvent,
    MonitoringSnapshot, PerformanceSample, SampleMetric, Severity, TestResult, TestStatus,
};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::alerts::{AlertBook, Breach};
use crate::error::AggregationError;
use crate::score::{compute_health_score, HealthInputs};
use crate::window::{classify_trend, percentile_exceeds, percentiles, RecencyMap, RingWindow};

/// Source name used for alerts on aggregate metrics.
pub const AGGREGATE_SOURCE: &str = "aggregate";

/// Usage at or above this percentage makes a resource alert critical.
const RESOURCE_CRITICAL_PCT: f64 = 95.0;

struct AggregatorState {
    config: MonitorConfig,
    outcomes: RingWindow<TestStatus>,
    passed_in_window: usize,
    failing_in_window: usize,
    latencies: RingWindow<f64>,
    /// Windowed latencies above the threshold, and above twice the threshold.
    slow_in_window: usize,
    very_slow_in_window: usize,
    /// Latest usage per (source, resource).
    resources: RecencyMap<(String, String), f64>,
    progress: ExecutionProgress,
    unresolved_critical: RecencyMap<ErrorId, FixTarget>,
    errors_recorded: u64,
    alerts: AlertBook,
}

impl AggregatorState {
    fn new(config: MonitorConfig) -> Self {
        Self {
            outcomes: RingWindow::new(config.window_size),
            passed_in_window: 0,
            failing_in_window: 0,
            latencies: RingWindow::new(config.window_size),
            slow_in_window: 0,
            very_slow_in_window: 0,
            resources: RecencyMap::new(config.tracked_limit),
            progress: ExecutionProgress::default(),
            unresolved_critical: RecencyMap::new(config.tracked_limit),
            errors_recorded: 0,
            alerts: AlertBook::new(
                config.effective_recovery_window(),
                config.alert_history_limit,
            ),
            config,
        }
    }

    fn rates(&self) -> (f64, f64) {
        let total = self.outcomes.len();
        if total == 0 {
            return (100.0, 0.0);
        }
        (
            self.passed_in_window as f64 / total as f64 * 100.0,
            self.failing_in_window as f64 / total as f64 * 100.0,
        )
    }

    fn push_outcome(&mut self, status: TestStatus) {
        if let Some(evicted) = self.outcomes.push(status) {
            if evicted == TestStatus::Passed {
                self.passed_in_window = self.passed_in_window.saturating_sub(1);
            }
            if evicted.is_failure() {
                self.failing_in_window = self.failing_in_window.saturating_sub(1);
            }
        }
        if status == TestStatus::Passed {
            self.passed_in_window += 1;
        }
        if status.is_failure() {
            self.failing_in_window += 1;
        }
    }

    fn push_latency(&mut self, ms: f64) {
        let threshold = self.config.thresholds.latency_ms;
        if let Some(evicted) = self.latencies.push(ms) {
            if evicted > threshold {
                self.slow_in_window = self.slow_in_window.saturating_sub(1);
            }
            if evicted > threshold * 2.0 {
                self.very_slow_in_window = self.very_slow_in_window.saturating_sub(1);
            }
        }
        if ms > threshold {
            self.slow_in_window += 1;
        }
        if ms > threshold * 2.0 {
            self.very_slow_in_window += 1;
        }
    }

    /// Recount the latency window against the current threshold.
    fn recount_latency(&mut self) {
        let threshold = self.config.thresholds.latency_ms;
        self.slow_in_window = self.latencies.iter().filter(|ms| **ms > threshold).count();
        self.very_slow_in_window = self
            .latencies
            .iter()
            .filter(|ms| **ms > threshold * 2.0)
            .count();
    }

    fn record_result(&mut self, result: &TestResult) -> Vec<AlertEvent> {
        self.progress.completed += 1;
        self.progress.total = self.progress.total.max(self.progress.completed);
        match result.status {
            TestStatus::Passed => self.progress.passed += 1,
            TestStatus::Failed => self.progress.failed += 1,
            TestStatus::Errored => self.progress.errored += 1,
            TestStatus::Skipped => self.progress.skipped += 1,
        }

        if result.status == TestStatus::Skipped {
            return Vec::new();
        }

        self.push_outcome(result.status);
        self.push_latency(result.duration_ms as f64);

        let mut events = self.evaluate_error_rate(result.recorded_at);
        events.extend(self.evaluate_latency(result.recorded_at));
        events
    }

    fn record_error(&mut self, entry: &ErrorEntry) -> Vec<AlertEvent> {
        self.errors_recorded += 1;
        if entry.severity != Severity::Critical {
            return Vec::new();
        }

        if let Some((dropped, target)) = self
            .unresolved_critical
            .insert(entry.id.clone(), entry.target())
        {
            debug!(error_id = %dropped, target = %target, "untracking oldest critical error");
        }
        let breach = Breach {
            key: AlertKey::critical_error(&entry.component, entry.category),
            severity: AlertSeverity::Critical,
            title: format!("Critical {} error in {}", entry.category, entry.component),
            message: entry.description.clone(),
        };
        vec![self.alerts.breach(breach, entry.detected_at)]
    }

    fn record_sample(&mut self, sample: &PerformanceSample) -> Vec<AlertEvent> {
        match &sample.metric {
            SampleMetric::Latency { ms } => {
                self.push_latency(*ms);
                self.evaluate_latency(sample.at).into_iter().collect()
            }
            SampleMetric::ResourceUsage { resource, pct } => {
                self.resources
                    .insert((sample.source.clone(), resource.clone()), *pct);
                let key = AlertKey::new(AlertKind::ResourceUsage, sample.source.clone())
                    .with_target(resource.clone());
                let threshold = self.config.thresholds.resource_usage_pct;
                if *pct > threshold {
                    let severity = if *pct >= RESOURCE_CRITICAL_PCT {
                        AlertSeverity::Critical
                    } else {
                        AlertSeverity::Warning
                    };
                    let breach = Breach {
                        key,
                        severity,
                        title: format!("{resource} usage above threshold"),
                        message: format!(
                            "{resource} usage on {} at {pct:.1}% exceeds {threshold:.1}%",
                            sample.source
                        ),
                    };
                    vec![self.alerts.breach(breach, sample.at)]
                } else {
                    self.alerts.healthy(&key, sample.at).into_iter().collect()
                }
            }
        }
    }

    fn evaluate_error_rate(&mut self, at: DateTime<Utc>) -> Vec<AlertEvent> {
        if self.outcomes.len() < self.config.min_samples.max(1) {
            return Vec::new();
        }

        let (_, error_rate) = self.rates();
        let threshold = self.config.thresholds.error_rate_pct;
        let key = AlertKey::new(AlertKind::ErrorRate, AGGREGATE_SOURCE);
        if error_rate > threshold {
            let severity = if error_rate > threshold * 2.0 {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            };
            let breach = Breach {
                key,
                severity,
                title: "Error rate above threshold".to_string(),
                message: format!("error rate {error_rate:.1}% exceeds {threshold:.1}%"),
            };
            vec![self.alerts.breach(breach, at)]
        } else {
            self.alerts.healthy(&key, at).into_iter().collect()
        }
    }

    fn evaluate_latency(&mut self, at: DateTime<Utc>) -> Option<AlertEvent> {
        let samples = self.latencies.len();
        if samples < self.config.min_samples.max(1) {
            return None;
        }

        let threshold = self.config.thresholds.latency_ms;
        let key = AlertKey::new(AlertKind::Latency, AGGREGATE_SOURCE);
        if percentile_exceeds(samples, self.slow_in_window, 95.0) {
            let severity = if percentile_exceeds(samples, self.very_slow_in_window, 95.0) {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            };
            let breach = Breach {
                key,
                severity,
                title: "p95 latency above threshold".to_string(),
                message: format!(
                    "p95 latency exceeds {threshold:.0}ms ({} of {samples} samples slower)",
                    self.slow_in_window
                ),
            };
            Some(self.alerts.breach(breach, at))
        } else {
            self.alerts.healthy(&key, at)
        }
    }

    fn snapshot(&self) -> MonitoringSnapshot {
        let (pass_rate, error_rate) = self.rates();
        let failure_series: Vec<f64> = self
            .outcomes
            .iter()
            .map(|status| if status.is_failure() { 1.0 } else { 0.0 })
            .collect();
        let error_trend = classify_trend(&failure_series, self.config.trend_dead_band_pct);
        let latency = percentiles(&self.latencies.to_vec());
        let resource_usage_pct = self
            .resources
            .values()
            .copied()
            .fold(None, |max: Option<f64>, pct| Some(max.map_or(pct, |m| m.max(pct))));
        let unresolved_critical = self.unresolved_critical.len() as u32;

        let inputs = HealthInputs {
            pass_rate,
            error_rate,
            p95_latency_ms: (!self.latencies.is_empty()).then_some(latency.p95),
            unresolved_critical,
        };
        let health_score = compute_health_score(&inputs, &self.config);

        MonitoringSnapshot {
            taken_at: Utc::now(),
            progress: self.progress,
            pass_rate,
            error_rate,
            error_trend,
            latency,
            resource_usage_pct,
            unresolved_critical,
            active_alerts: self.alerts.active_count(),
            health_score,
            status: HealthStatus::from_score(health_score),
        }
    }
}

/// Thread-safe monitoring sink shared by every producer.
///
/// All state sits behind one short-lived lock. `record` only adjusts running
/// window counters; `snapshot` recomputes percentiles and trend from the
/// windows and never blocks writers for longer than a sort of one window.
pub struct Aggregator {
    state: Mutex<AggregatorState>,
}

impl Aggregator {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            state: Mutex::new(AggregatorState::new(config)),
        }
    }

    fn state(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ingest one event and return the alert transitions it caused.
    ///
    /// Malformed events are dropped with a warning and reported as
    /// [`AggregationError::Malformed`]; the sink state is left untouched.
    pub fn record(&self, event: &MonitorEvent) -> Result<Vec<AlertEvent>, AggregationError> {
        if let Err(err) = check_event(event) {
            warn!(error = %err, "dropping malformed monitoring event");
            return Err(err);
        }

        let events = {
            let mut state = self.state();
            match event {
                MonitorEvent::Result(result) => state.record_result(result),
                MonitorEvent::Error(entry) => state.record_error(entry),
                MonitorEvent::Sample(sample) => state.record_sample(sample),
            }
        };

        for alert_event in &events {
            debug!(
                alert = %alert_event.alert.key,
                kind = ?alert_event.kind,
                "alert transition"
            );
        }
        Ok(events)
    }

    pub fn record_result(&self, result: &TestResult) -> Result<Vec<AlertEvent>, AggregationError> {
        self.record(&MonitorEvent::Result(result.clone()))
    }

    pub fn record_error(&self, entry: &ErrorEntry) -> Result<Vec<AlertEvent>, AggregationError> {
        self.record(&MonitorEvent::Error(entry.clone()))
    }

    pub fn record_sample(
        &self,
        sample: &PerformanceSample,
    ) -> Result<Vec<AlertEvent>, AggregationError> {
        self.record(&MonitorEvent::Sample(sample.clone()))
    }

    pub fn snapshot(&self) -> MonitoringSnapshot {
        self.state().snapshot()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.state().alerts.active()
    }

    pub fn unacknowledged_alerts(&self) -> Vec<Alert> {
        self.state().alerts.unacknowledged()
    }

    /// Returns false when no active alert has this id.
    pub fn acknowledge(&self, id: &AlertId) -> bool {
        self.state().alerts.acknowledge(id)
    }

    pub fn resolve(&self, id: &AlertId) -> Option<AlertEvent> {
        self.state().alerts.resolve(id, Utc::now())
    }

    pub fn alert_history(&self) -> Vec<Alert> {
        self.state().alerts.history()
    }

    /// Stop counting a critical error once a fix for it has committed.
    ///
    /// Clears the target's critical alert when no other critical error for the
    /// same (component, category) remains open.
    pub fn mark_error_resolved(&self, error_id: &ErrorId) -> Option<AlertEvent> {
        let mut state = self.state();
        let target = state.unresolved_critical.remove(error_id)?;
        let still_open = state
            .unresolved_critical
            .values()
            .any(|other| other == &target);
        if still_open {
            return None;
        }
        let key = AlertKey::critical_error(&target.component, target.category);
        state.alerts.clear(&key, Utc::now())
    }

    /// Declare how many more units are expected to report.
    pub fn set_progress(&self, additional_units: u64) {
        let mut state = self.state();
        state.progress.total = state
            .progress
            .total
            .saturating_add(additional_units)
            .max(state.progress.completed);
    }

    /// Replace the alert thresholds. The latest caller wins.
    pub fn update_thresholds(&self, thresholds: AlertThresholds) {
        let mut state = self.state();
        state.config.thresholds = thresholds;
        state.recount_latency();
    }

    pub fn thresholds(&self) -> AlertThresholds {
        self.state().config.thresholds
    }

    pub fn errors_recorded(&self) -> u64 {
        self.state().errors_recorded
    }

    /// Drop all window, progress and alert state. Thresholds are kept.
    pub fn reset(&self) {
        let mut state = self.state();
        let config = state.config.clone();
        *state = AggregatorState::new(config);
    }
}

fn check_event(event: &MonitorEvent) -> Result<(), AggregationError> {
    match event {
        MonitorEvent::Result(result) => {
            if result.id.as_ref().trim().is_empty() {
                return Err(malformed("result", "unit id is empty"));
            }
            if result.suite_id.trim().is_empty() {
                return Err(malformed("result", "suite id is empty"));
            }
        }
        MonitorEvent::Error(entry) => {
            if entry.component.trim().is_empty() {
                return Err(malformed("error", "component is empty"));
            }
        }
        MonitorEvent::Sample(sample) => {
            if sample.source.trim().is_empty() {
                return Err(malformed("sample", "source is empty"));
            }
            match &sample.metric {
                SampleMetric::Latency { ms } => {
                    if !ms.is_finite() || *ms < 0.0 {
                        return Err(malformed("sample", format!("latency {ms} is not valid")));
                    }
                }
                SampleMetric::ResourceUsage { resource, pct } => {
                    if resource.trim().is_empty() {
                        return Err(malformed("sample", "resource name is empty"));
                    }
                    if !pct.is_finite() || *pct < 0.0 {
                        return Err(malformed("sample", format!("usage {pct} is not valid")));
                    }
                }
            }
        }
    }
    Ok(())
}

fn malformed(event: &'static str, reason: impl Into<String>) -> AggregationError {
    AggregationError::Malformed {
        event,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use medic_core::{AlertEventKind, ErrorCategory, Trend, UnitId};
    use std::sync::Arc;

    fn config() -> MonitorConfig {
        MonitorConfig {
            min_samples: 1,
            ..MonitorConfig::default()
        }
    }

    fn result(status: TestStatus, duration_ms: u64) -> TestResult {
        TestResult::new(UnitId::generate(), "checkout", "pay", status, duration_ms)
    }

    #[test]
    fn empty_aggregator_is_healthy() {
        let aggregator = Aggregator::new(config());
        let snapshot = aggregator.snapshot();

        assert_eq!(snapshot.pass_rate, 100.0);
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.health_score, 100.0);
        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert_eq!(snapshot.error_trend, Trend::Stable);
        assert!(snapshot.resource_usage_pct.is_none());
    }

    #[test]
    fn snapshot_reflects_recorded_results() {
        let aggregator = Aggregator::new(config());
        aggregator.set_progress(5);
        for status in [
            TestStatus::Passed,
            TestStatus::Passed,
            TestStatus::Passed,
            TestStatus::Failed,
            TestStatus::Skipped,
        ] {
            aggregator
                .record_result(&result(status, 100))
                .expect("record result");
        }

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.progress.total, 5);
        assert_eq!(snapshot.progress.completed, 5);
        assert_eq!(snapshot.progress.skipped, 1);
        assert_eq!(snapshot.pass_rate, 75.0);
        assert_eq!(snapshot.error_rate, 25.0);
        assert_eq!(snapshot.latency.p95, 100.0);
        // 100 - 25*0.5 - 15
        assert_eq!(snapshot.health_score, 72.5);
        assert_eq!(snapshot.status, HealthStatus::Degraded);
    }

    #[test]
    fn identical_breaches_produce_one_alert_with_latest_timestamp() {
        let aggregator = Aggregator::new(config());
        let start = Utc::now();
        let mut last_breach = start;

        for i in 0..6 {
            let mut failed = result(TestStatus::Failed, 10);
            failed.recorded_at = start + Duration::milliseconds(i * 10);
            last_breach = failed.recorded_at;
            aggregator.record_result(&failed).expect("record result");
        }

        let alerts = aggregator.active_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].key.kind, AlertKind::ErrorRate);
        assert_eq!(alerts[0].occurrences, 6);
        assert_eq!(alerts[0].last_seen, last_breach);
    }

    #[test]
    fn error_rate_alert_needs_sustained_recovery() {
        let aggregator = Aggregator::new(MonitorConfig {
            window_size: 2,
            recovery_window: Some(2),
            min_samples: 1,
            ..MonitorConfig::default()
        });

        aggregator
            .record_result(&result(TestStatus::Failed, 1))
            .expect("record");
        let events = aggregator
            .record_result(&result(TestStatus::Failed, 1))
            .expect("record");
        assert_eq!(events[0].kind, AlertEventKind::Refreshed);

        // [failed, passed] is still 50% errors.
        aggregator
            .record_result(&result(TestStatus::Passed, 1))
            .expect("record");
        // First healthy window.
        let events = aggregator
            .record_result(&result(TestStatus::Passed, 1))
            .expect("record");
        assert!(events.is_empty());
        assert_eq!(aggregator.active_alerts().len(), 1);

        let events = aggregator
            .record_result(&result(TestStatus::Passed, 1))
            .expect("record");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertEventKind::Cleared);
        assert!(aggregator.active_alerts().is_empty());
        assert_eq!(aggregator.alert_history().len(), 1);
    }

    #[test]
    fn min_samples_delays_error_rate_alerts() {
        let aggregator = Aggregator::new(MonitorConfig {
            min_samples: 3,
            ..MonitorConfig::default()
        });

        for _ in 0..2 {
            let events = aggregator
                .record_result(&result(TestStatus::Failed, 1))
                .expect("record");
            assert!(events.is_empty());
        }
        let events = aggregator
            .record_result(&result(TestStatus::Failed, 1))
            .expect("record");
        assert_eq!(events[0].kind, AlertEventKind::Raised);
    }

    #[test]
    fn resource_alerts_are_keyed_by_source_and_resource() {
        let aggregator = Aggregator::new(config());
        aggregator
            .record_sample(&PerformanceSample::resource("api", "memory", 97.0))
            .expect("record");
        aggregator
            .record_sample(&PerformanceSample::resource("api", "cpu", 90.0))
            .expect("record");
        aggregator
            .record_sample(&PerformanceSample::resource("api", "memory", 98.0))
            .expect("record");

        let alerts = aggregator.active_alerts();
        assert_eq!(alerts.len(), 2);
        let memory = alerts
            .iter()
            .find(|alert| alert.key.target.as_deref() == Some("memory"))
            .expect("memory alert");
        assert_eq!(memory.severity, AlertSeverity::Critical);
        assert_eq!(memory.occurrences, 2);
        assert_eq!(aggregator.snapshot().resource_usage_pct, Some(98.0));
    }

    #[test]
    fn latency_alert_uses_p95() {
        let aggregator = Aggregator::new(config());
        let events = aggregator
            .record_sample(&PerformanceSample::latency("vu-1", 4_500.0))
            .expect("record");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].alert.key.kind, AlertKind::Latency);
        assert_eq!(events[0].alert.severity, AlertSeverity::Critical);
    }

    #[test]
    fn critical_errors_penalize_until_resolved() {
        let aggregator = Aggregator::new(config());
        let first = ErrorEntry::new(
            Severity::Critical,
            ErrorCategory::Integration,
            "db",
            "connection pool exhausted",
        );
        let second = ErrorEntry::new(
            Severity::Critical,
            ErrorCategory::Integration,
            "db",
            "connection pool exhausted again",
        );
        aggregator.record_error(&first).expect("record");
        aggregator.record_error(&second).expect("record");

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.unresolved_critical, 2);
        assert_eq!(snapshot.health_score, 80.0);
        assert_eq!(aggregator.active_alerts().len(), 1);

        assert!(aggregator.mark_error_resolved(&first.id).is_none());
        let cleared = aggregator
            .mark_error_resolved(&second.id)
            .expect("last open error clears alert");
        assert_eq!(cleared.kind, AlertEventKind::Cleared);
        assert_eq!(aggregator.snapshot().health_score, 100.0);
        assert!(aggregator.mark_error_resolved(&second.id).is_none());
    }

    #[test]
    fn non_critical_errors_do_not_alert() {
        let aggregator = Aggregator::new(config());
        let entry = ErrorEntry::new(Severity::High, ErrorCategory::Functional, "ui", "broken");
        let events = aggregator.record_error(&entry).expect("record");
        assert!(events.is_empty());
        assert_eq!(aggregator.errors_recorded(), 1);
        assert_eq!(aggregator.snapshot().unresolved_critical, 0);
    }

    #[test]
    fn malformed_events_are_dropped() {
        let aggregator = Aggregator::new(config());

        let err = aggregator
            .record_sample(&PerformanceSample::latency("vu", f64::NAN))
            .expect_err("nan latency is malformed");
        assert!(matches!(err, AggregationError::Malformed { event: "sample", .. }));

        let err = aggregator
            .record_sample(&PerformanceSample::resource("vu", "cpu", -3.0))
            .expect_err("negative usage is malformed");
        assert!(err.to_string().contains("usage -3"));

        let mut bad = result(TestStatus::Passed, 1);
        bad.id = UnitId::new("  ");
        assert!(aggregator.record_result(&bad).is_err());

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.progress.completed, 0);
        assert_eq!(snapshot.latency.p50, 0.0);
    }

    #[test]
    fn acknowledge_and_resolve_alerts() {
        let aggregator = Aggregator::new(config());
        aggregator
            .record_result(&result(TestStatus::Failed, 1))
            .expect("record");
        let alert = aggregator.active_alerts().remove(0);

        assert!(aggregator.acknowledge(&alert.id));
        assert!(aggregator.unacknowledged_alerts().is_empty());

        let event = aggregator.resolve(&alert.id).expect("resolve active alert");
        assert_eq!(event.kind, AlertEventKind::Cleared);
        assert!(aggregator.active_alerts().is_empty());
    }

    #[test]
    fn updated_thresholds_apply_to_later_events() {
        let aggregator = Aggregator::new(config());
        aggregator.update_thresholds(AlertThresholds {
            latency_ms: 50.0,
            ..AlertThresholds::default()
        });

        let events = aggregator
            .record_sample(&PerformanceSample::latency("vu", 80.0))
            .expect("record");
        assert_eq!(events.len(), 1);
        assert_eq!(aggregator.thresholds().latency_ms, 50.0);
    }

    #[test]
    fn window_counters_follow_evictions() {
        let aggregator = Aggregator::new(MonitorConfig {
            window_size: 4,
            min_samples: 1,
            thresholds: AlertThresholds {
                error_rate_pct: 100.0,
                latency_ms: 1_000.0,
                ..AlertThresholds::default()
            },
            ..MonitorConfig::default()
        });

        for status in [TestStatus::Failed, TestStatus::Failed, TestStatus::Passed] {
            aggregator.record_result(&result(status, 2_500)).expect("record");
        }
        assert_eq!(aggregator.active_alerts()[0].severity, AlertSeverity::Critical);

        // Four fast passes evict every slow failure; four more give a full
        // healthy window.
        for _ in 0..8 {
            aggregator
                .record_result(&result(TestStatus::Passed, 10))
                .expect("record");
        }
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.pass_rate, 100.0);
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.latency.p95, 10.0);
        assert!(aggregator.active_alerts().is_empty());
    }

    #[test]
    fn threshold_change_recounts_recorded_latencies() {
        let aggregator = Aggregator::new(config());
        for _ in 0..3 {
            let events = aggregator
                .record_sample(&PerformanceSample::latency("vu", 300.0))
                .expect("record");
            assert!(events.is_empty());
        }

        aggregator.update_thresholds(AlertThresholds {
            latency_ms: 100.0,
            ..AlertThresholds::default()
        });
        let events = aggregator
            .record_sample(&PerformanceSample::latency("vu", 20.0))
            .expect("record");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].alert.severity, AlertSeverity::Critical);
    }

    #[test]
    fn tracked_gauges_and_critical_errors_are_bounded() {
        let aggregator = Aggregator::new(MonitorConfig {
            tracked_limit: 2,
            ..config()
        });
        for (source, pct) in [("a", 90.0), ("b", 10.0), ("c", 20.0)] {
            aggregator
                .record_sample(&PerformanceSample::resource(source, "cpu", pct))
                .expect("record");
        }
        assert_eq!(aggregator.snapshot().resource_usage_pct, Some(20.0));

        for n in 0..5 {
            let entry = ErrorEntry::new(
                Severity::Critical,
                ErrorCategory::Integration,
                "db",
                format!("rollback {n} failed"),
            );
            aggregator.record_error(&entry).expect("record");
        }
        assert_eq!(aggregator.snapshot().unresolved_critical, 2);
    }

    #[test]
    fn reset_clears_state() {
        let aggregator = Aggregator::new(config());
        aggregator
            .record_result(&result(TestStatus::Failed, 1))
            .expect("record");
        aggregator.reset();

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.progress.completed, 0);
        assert_eq!(snapshot.active_alerts, 0);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let aggregator = Arc::new(Aggregator::new(MonitorConfig {
            window_size: 1_000,
            ..MonitorConfig::default()
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        aggregator
                            .record_result(&result(TestStatus::Passed, 5))
                            .expect("record");
                        let _ = aggregator.snapshot();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("producer thread");
        }

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.progress.completed, 400);
        assert_eq!(snapshot.progress.passed, 400);
    }
}
