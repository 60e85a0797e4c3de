//! Executes one test unit: per-attempt task isolation, timeout and retry.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use medic_core::{
    ControllerConfig, ErrorEntry, PerformanceSample, ResultDetails, TestConfiguration, TestResult,
    TestStatus, UnitId,
};
use tracing::{debug, warn};

use crate::probe::{Probe, ProbeContext, ProbeReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitPolicy {
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl UnitPolicy {
    pub fn from_config(config: &TestConfiguration, controller: &ControllerConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(controller.retry_delay_ms),
        }
    }
}

/// Decision returned by the retry evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub reason: String,
}

/// Only errored attempts (crash, timeout, probe error) are retried. An
/// assertion failure is an answer, not an accident.
pub fn evaluate_retry(
    status: TestStatus,
    attempt: u32,
    policy: &UnitPolicy,
    cancelled: bool,
) -> RetryDecision {
    let decision = |should_retry: bool, reason: String| RetryDecision {
        should_retry,
        reason,
    };

    if status != TestStatus::Errored {
        return decision(false, format!("unit {status}"));
    }
    if cancelled {
        return decision(false, "session cancelled".to_string());
    }
    if attempt > policy.retry_attempts {
        return decision(
            false,
            format!("retry budget ({}) exhausted", policy.retry_attempts),
        );
    }
    decision(
        true,
        format!("retrying (attempt {}/{})", attempt + 1, policy.retry_attempts + 1),
    )
}

/// Everything one unit produced.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutcome {
    pub result: TestResult,
    /// Errors reported by the final attempt.
    pub errors: Vec<ErrorEntry>,
    /// Samples from every attempt.
    pub samples: Vec<PerformanceSample>,
}

/// Run `probe` until it settles. Each attempt is spawned on its own task so a
/// panic is contained to the attempt; a per-attempt timeout always wins over
/// a slow completion.
pub async fn run_unit(probe: Arc<dyn Probe>, ctx: ProbeContext, policy: &UnitPolicy) -> UnitOutcome {
    let limit_ms = u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX);
    let mut samples = Vec::new();
    let mut attempt = 1;

    loop {
        let started = tokio::time::Instant::now();
        let mut handle = tokio::spawn(probe.run(ctx.clone().with_attempt(attempt)));

        let report = match tokio::time::timeout(policy.timeout, &mut handle).await {
            Ok(Ok(report)) => report,
            Ok(Err(join_err)) => {
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "unit task was aborted".to_string()
                };
                ProbeReport::errored(format!("unit panicked: {message}"))
                    .with_details(ResultDetails::Panic { message })
            }
            Err(_elapsed) => {
                handle.abort();
                ProbeReport::errored(format!("unit exceeded {limit_ms}ms timeout"))
                    .with_details(ResultDetails::Timeout { limit_ms })
            }
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let ProbeReport {
            status,
            message,
            details,
            errors,
            samples: attempt_samples,
        } = report;
        samples.extend(attempt_samples);

        let decision = evaluate_retry(status, attempt, policy, ctx.is_cancelled());
        if decision.should_retry {
            warn!(
                session_id = %ctx.session_id,
                unit_id = %ctx.unit_id,
                attempt,
                reason = %decision.reason,
                "unit errored; retrying"
            );
            if !policy.retry_delay.is_zero() {
                tokio::time::sleep(policy.retry_delay).await;
            }
            attempt += 1;
            continue;
        }

        debug!(
            session_id = %ctx.session_id,
            unit_id = %ctx.unit_id,
            status = %status,
            attempts = attempt,
            duration_ms,
            "unit settled"
        );

        let mut result = TestResult::new(
            UnitId::new(probe.id()),
            ctx.suite_id.clone(),
            probe.name(),
            status,
            duration_ms,
        );
        result.message = message;
        result.details = details;
        result.attempts = attempt;

        return UnitOutcome {
            result,
            errors,
            samples,
        };
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::FnProbe;
    use medic_core::SessionId;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::watch;

    fn ctx(rx: watch::Receiver<bool>) -> ProbeContext {
        ProbeContext::new(SessionId::new("S1"), "smoke", UnitId::new("u1"), rx)
    }

    fn policy(timeout_ms: u64, retry_attempts: u32) -> UnitPolicy {
        UnitPolicy {
            timeout: Duration::from_millis(timeout_ms),
            retry_attempts,
            retry_delay: Duration::from_millis(10),
        }
    }

    fn sleeping(ms: u64, report: ProbeReport) -> Arc<dyn Probe> {
        Arc::new(FnProbe::new("u1", "sleeper", move |_ctx| {
            let report = report.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                report
            })
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn passing_unit_takes_one_attempt() {
        let (_tx, rx) = watch::channel(false);
        let outcome = run_unit(sleeping(20, ProbeReport::passed()), ctx(rx), &policy(100, 2)).await;

        assert_eq!(outcome.result.status, TestStatus::Passed);
        assert_eq!(outcome.result.attempts, 1);
        assert_eq!(outcome.result.suite_id, "smoke");
        assert_eq!(outcome.result.id, UnitId::new("u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_wins_over_slow_success_and_is_retried() {
        let (_tx, rx) = watch::channel(false);
        let outcome =
            run_unit(sleeping(500, ProbeReport::passed()), ctx(rx), &policy(100, 2)).await;

        assert_eq!(outcome.result.status, TestStatus::Errored);
        assert_eq!(outcome.result.attempts, 3);
        assert_eq!(
            outcome.result.details,
            Some(ResultDetails::Timeout { limit_ms: 100 })
        );
    }

    fn explode() -> ProbeReport {
        panic!("boom")
    }

    #[tokio::test]
    async fn panic_is_contained_and_reported() {
        let probe: Arc<dyn Probe> = Arc::new(FnProbe::new("u1", "panics", |_ctx| {
            Box::pin(async { explode() })
        }));
        let (_tx, rx) = watch::channel(false);
        let outcome = run_unit(probe, ctx(rx), &policy(1_000, 0)).await;

        assert_eq!(outcome.result.status, TestStatus::Errored);
        assert_eq!(
            outcome.result.details,
            Some(ResultDetails::Panic {
                message: "boom".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flaky_unit_passes_on_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let probe: Arc<dyn Probe> = {
            let calls = Arc::clone(&calls);
            Arc::new(FnProbe::new("u1", "flaky", move |_ctx| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if n == 0 {
                        ProbeReport::errored("connection reset")
                    } else {
                        ProbeReport::passed()
                    }
                })
            }))
        };
        let (_tx, rx) = watch::channel(false);
        let outcome = run_unit(probe, ctx(rx), &policy(1_000, 3)).await;

        assert_eq!(outcome.result.status, TestStatus::Passed);
        assert_eq!(outcome.result.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn assertion_failure_is_not_retried() {
        let (_tx, rx) = watch::channel(false);
        let outcome = run_unit(
            sleeping(10, ProbeReport::failed("expected 200, got 500")),
            ctx(rx),
            &policy(1_000, 3),
        )
        .await;

        assert_eq!(outcome.result.status, TestStatus::Failed);
        assert_eq!(outcome.result.attempts, 1);
        assert_eq!(outcome.result.message.as_deref(), Some("expected 200, got 500"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_retries() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).expect("receiver alive");
        let outcome =
            run_unit(sleeping(500, ProbeReport::passed()), ctx(rx), &policy(100, 5)).await;
        assert_eq!(outcome.result.attempts, 1);
    }

    #[test]
    fn retry_budget_counts_attempts_after_the_first() {
        let policy = policy(100, 1);
        assert!(evaluate_retry(TestStatus::Errored, 1, &policy, false).should_retry);
        assert!(!evaluate_retry(TestStatus::Errored, 2, &policy, false).should_retry);
        assert!(!evaluate_retry(TestStatus::Passed, 1, &policy, false).should_retry);
    }
}
