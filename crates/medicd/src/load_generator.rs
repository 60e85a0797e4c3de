//! Virtual load generator: concurrent synthetic users walking a workflow.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use medic_core::{
    ErrorCategory, ErrorContext, ErrorEntry, PerformanceSample, ResultDetails, Severity,
};
use serde::{Deserialize, Serialize};

use crate::probe::{Probe, ProbeContext, ProbeReport};

/// How a step fails when it is scheduled to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    /// Fail on every n-th iteration (1-based). `1` fails every time.
    #[serde(default = "default_every")]
    pub every: u32,
    pub severity: Severity,
    pub category: ErrorCategory,
    pub description: String,
    #[serde(default)]
    pub context: Option<ErrorContext>,
    #[serde(default = "default_auto_fixable")]
    pub auto_fixable: bool,
}

fn default_every() -> u32 {
    1
}

fn default_auto_fixable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    /// Component the step exercises; used as sample source and error owner.
    pub component: String,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub failure: Option<StepFailure>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, component: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            name: name.into(),
            component: component.into(),
            latency_ms,
            failure: None,
        }
    }

    pub fn failing(mut self, failure: StepFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    fn fails_on(&self, iteration: u32) -> Option<&StepFailure> {
        self.failure
            .as_ref()
            .filter(|failure| (iteration + 1) % failure.every.max(1) == 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadProfile {
    pub virtual_users: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default)]
    pub think_time_ms: u64,
    pub steps: Vec<WorkflowStep>,
}

fn default_iterations() -> u32 {
    1
}

/// Result of executing one workflow step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub latency_ms: f64,
    pub error: Option<ErrorEntry>,
}

/// Executes workflow steps on behalf of a virtual user.
pub trait WorkflowDriver: Send + Sync {
    fn execute<'a>(
        &'a self,
        step: &'a WorkflowStep,
        user: u32,
        iteration: u32,
    ) -> BoxFuture<'a, StepOutcome>;
}

/// Deterministic driver: waits the step's latency and fails on schedule.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedWorkflow;

impl WorkflowDriver for ScriptedWorkflow {
    fn execute<'a>(
        &'a self,
        step: &'a WorkflowStep,
        _user: u32,
        iteration: u32,
    ) -> BoxFuture<'a, StepOutcome> {
        Box::pin(async move {
            let started = tokio::time::Instant::now();
            if step.latency_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step.latency_ms)).await;
            }
            let error = step.fails_on(iteration).map(|failure| {
                let entry = ErrorEntry::new(
                    failure.severity,
                    failure.category,
                    step.component.clone(),
                    failure.description.clone(),
                )
                .auto_fixable(failure.auto_fixable);
                match &failure.context {
                    Some(context) => entry.with_context(context.clone()),
                    None => entry,
                }
            });
            StepOutcome {
                latency_ms: started.elapsed().as_secs_f64() * 1_000.0,
                error,
            }
        })
    }
}

/// One virtual user running the whole profile as a single test unit.
pub struct VirtualUserProbe {
    id: String,
    name: String,
    user: u32,
    profile: Arc<LoadProfile>,
    driver: Arc<dyn WorkflowDriver>,
}

impl Probe for VirtualUserProbe {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: ProbeContext) -> BoxFuture<'static, ProbeReport> {
        let user = self.user;
        let profile = Arc::clone(&self.profile);
        let driver = Arc::clone(&self.driver);
        Box::pin(async move { walk(user, &profile, driver.as_ref(), &ctx).await })
    }
}

async fn walk(
    user: u32,
    profile: &LoadProfile,
    driver: &dyn WorkflowDriver,
    ctx: &ProbeContext,
) -> ProbeReport {
    let steps_total = profile.steps.len() * profile.iterations as usize;
    let mut steps_completed = 0;
    let mut failed_step = None;
    let mut samples = Vec::new();
    let mut errors = Vec::new();

    'iterations: for iteration in 0..profile.iterations {
        if iteration > 0 && profile.think_time_ms > 0 {
            tokio::time::sleep(Duration::from_millis(profile.think_time_ms)).await;
        }
        for step in &profile.steps {
            if ctx.is_cancelled() {
                break 'iterations;
            }
            let outcome = driver.execute(step, user, iteration).await;
            samples.push(PerformanceSample::latency(
                step.component.clone(),
                outcome.latency_ms,
            ));
            match outcome.error {
                Some(error) => {
                    failed_step.get_or_insert_with(|| step.name.clone());
                    errors.push(error.with_session(ctx.session_id.clone()));
                    // The rest of this iteration depends on the failed step.
                    continue 'iterations;
                }
                None => steps_completed += 1,
            }
        }
    }

    let details = ResultDetails::Workflow {
        steps_completed,
        steps_total,
        failed_step: failed_step.clone(),
    };
    let mut report = if ctx.is_cancelled() && steps_completed + errors.len() < steps_total {
        ProbeReport::skipped(format!(
            "cancelled after {steps_completed} of {steps_total} steps"
        ))
    } else if let Some(step) = failed_step {
        ProbeReport::failed(format!(
            "{} step failure(s), first at `{step}`",
            errors.len()
        ))
        .with_details(details)
    } else {
        ProbeReport::passed().with_details(details)
    };
    report.errors = errors;
    report.samples = samples;
    report
}

/// Turns a load profile into one probe per virtual user.
pub struct LoadGenerator {
    driver: Arc<dyn WorkflowDriver>,
}

impl LoadGenerator {
    pub fn new(driver: Arc<dyn WorkflowDriver>) -> Self {
        Self { driver }
    }

    pub fn scripted() -> Self {
        Self::new(Arc::new(ScriptedWorkflow))
    }

    pub fn probes(&self, suite_id: &str, profile: LoadProfile) -> Vec<Arc<dyn Probe>> {
        let profile = Arc::new(profile);
        (0..profile.virtual_users)
            .map(|user| {
                Arc::new(VirtualUserProbe {
                    id: format!("{suite_id}-vu-{user}"),
                    name: format!("{suite_id} virtual user {user}"),
                    user,
                    profile: Arc::clone(&profile),
                    driver: Arc::clone(&self.driver),
                }) as Arc<dyn Probe>
            })
            .collect()
    }
}
