//! Pluggable test units.
//!
//! A [`Probe`] runs one unit of work and reports what it saw. The controller
//! never inspects how a probe decides pass or fail.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use medic_core::{
    ErrorEntry, PerformanceSample, ResultDetails, SessionId, TestStatus, UnitId,
};
use tokio::process::Command;
use tokio::sync::watch;

/// Lines of combined output kept from a command probe.
const OUTPUT_TAIL_LINES: usize = 20;

/// What a unit hands to each probe attempt.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    pub session_id: SessionId,
    pub suite_id: String,
    pub unit_id: UnitId,
    /// 1-based attempt number.
    pub attempt: u32,
    cancel: watch::Receiver<bool>,
}

impl ProbeContext {
    pub fn new(
        session_id: SessionId,
        suite_id: impl Into<String>,
        unit_id: UnitId,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session_id,
            suite_id: suite_id.into(),
            unit_id,
            attempt: 1,
            cancel,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Checkpoint for cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the session is cancelled. Never resolves when the
    /// session finishes without cancellation.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.cancel.borrow_and_update() {
                return;
            }
            if self.cancel.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Outcome of one probe attempt, before the runner stamps identity and timing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub status: TestStatus,
    pub message: Option<String>,
    pub details: Option<ResultDetails>,
    pub errors: Vec<ErrorEntry>,
    pub samples: Vec<PerformanceSample>,
}

impl ProbeReport {
    fn with_status(status: TestStatus) -> Self {
        Self {
            status,
            message: None,
            details: None,
            errors: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn passed() -> Self {
        Self::with_status(TestStatus::Passed)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::with_status(TestStatus::Failed).with_message(message)
    }

    pub fn errored(message: impl Into<String>) -> Self {
        Self::with_status(TestStatus::Errored).with_message(message)
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::with_status(TestStatus::Skipped)
            .with_message(reason.clone())
            .with_details(ResultDetails::Skipped { reason })
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: ResultDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_error(mut self, error: ErrorEntry) -> Self {
        self.errors.push(error);
        self
    }

    pub fn with_sample(mut self, sample: PerformanceSample) -> Self {
        self.samples.push(sample);
        self
    }
}

pub trait Probe: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    /// The returned future owns everything it needs so the runner can move
    /// it onto its own task.
    fn run(&self, ctx: ProbeContext) -> BoxFuture<'static, ProbeReport>;
}

type ProbeFn = dyn Fn(ProbeContext) -> BoxFuture<'static, ProbeReport> + Send + Sync;

/// Probe backed by a closure.
#[derive(Clone)]
pub struct FnProbe {
    id: String,
    name: String,
    run: Arc<ProbeFn>,
}

impl FnProbe {
    pub fn new<F>(id: impl Into<String>, name: impl Into<String>, run: F) -> Self
    where
        F: Fn(ProbeContext) -> BoxFuture<'static, ProbeReport> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            run: Arc::new(run),
        }
    }
}

impl fmt::Debug for FnProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProbe")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Probe for FnProbe {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: ProbeContext) -> BoxFuture<'static, ProbeReport> {
        (self.run)(ctx)
    }
}

/// Runs a shell command. Exit status 0 passes; anything else fails with the
/// tail of its output as the message. The child is killed if the attempt is
/// abandoned.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    pub id: String,
    pub name: String,
    pub command: String,
    pub shell: String,
    pub working_dir: Option<PathBuf>,
}

impl CommandProbe {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            command: command.into(),
            shell: "sh".to_string(),
            working_dir: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl Probe for CommandProbe {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, _ctx: ProbeContext) -> BoxFuture<'static, ProbeReport> {
        let probe = self.clone();
        Box::pin(async move {
            let mut command = Command::new(&probe.shell);
            command.arg("-c").arg(&probe.command).kill_on_drop(true);
            if let Some(dir) = &probe.working_dir {
                command.current_dir(dir);
            }

            let output = match command.output().await {
                Ok(output) => output,
                Err(err) => {
                    return ProbeReport::errored(format!(
                        "failed to spawn `{}`: {err}",
                        probe.command
                    ))
                }
            };

            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            let tail = output_tail(&combined, OUTPUT_TAIL_LINES);
            let details = ResultDetails::Command {
                exit_code: output.status.code(),
                output_tail: tail.clone(),
            };

            if output.status.success() {
                return ProbeReport::passed().with_details(details);
            }

            let message = if tail.is_empty() {
                format!("`{}` exited with {:?}", probe.command, output.status.code())
            } else {
                tail
            };
            ProbeReport::failed(message).with_details(details)
        })
    }
}

fn output_tail(output: &str, lines: usize) -> String {
    let all: Vec<&str> = output.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> (watch::Sender<bool>, ProbeContext) {
        let (tx, rx) = watch::channel(false);
        let ctx = ProbeContext::new(SessionId::new("S1"), "smoke", UnitId::new("u1"), rx);
        (tx, ctx)
    }

    #[tokio::test]
    async fn fn_probe_runs_closure() {
        let probe = FnProbe::new("u1", "always passes", |_ctx| {
            Box::pin(async { ProbeReport::passed() })
        });
        let (_tx, ctx) = ctx();
        assert_eq!(probe.run(ctx).await.status, TestStatus::Passed);
        assert_eq!(probe.name(), "always passes");
    }

    #[tokio::test]
    async fn context_observes_cancellation() {
        let (tx, mut ctx) = ctx();
        assert!(!ctx.is_cancelled());

        let waiter = tokio::spawn(async move {
            ctx.cancelled().await;
            ctx.is_cancelled()
        });
        tx.send(true).expect("receiver alive");
        assert!(waiter.await.expect("waiter joins"));
    }

    #[tokio::test]
    async fn command_probe_passes_on_zero_exit() {
        let probe = CommandProbe::new("echo", "echo hello");
        let (_tx, ctx) = ctx();
        let report = probe.run(ctx).await;

        assert_eq!(report.status, TestStatus::Passed);
        assert_eq!(
            report.details,
            Some(ResultDetails::Command {
                exit_code: Some(0),
                output_tail: "hello".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn command_probe_fails_with_output_tail() {
        let probe = CommandProbe::new("fail", "echo boom >&2; exit 3");
        let (_tx, ctx) = ctx();
        let report = probe.run(ctx).await;

        assert_eq!(report.status, TestStatus::Failed);
        assert_eq!(report.message.as_deref(), Some("boom"));
        assert!(matches!(
            report.details,
            Some(ResultDetails::Command {
                exit_code: Some(3),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn command_probe_errors_when_shell_is_missing() {
        let mut probe = CommandProbe::new("missing", "true");
        probe.shell = "/nonexistent/shell".to_string();
        let (_tx, ctx) = ctx();
        assert_eq!(probe.run(ctx).await.status, TestStatus::Errored);
    }

    #[test]
    fn output_tail_keeps_last_lines() {
        assert_eq!(output_tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(output_tail("", 5), "");
    }
}
