//! `medic` command line: plan loading, session execution and report output.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use medic_core::{
    load_settings, parse_test_configuration, ConfigError, ControllerConfig, FixRecord,
    MedicSettings, MonitorConfig, MonitoringSnapshot, SessionSummary, TestConfiguration,
    TestResult, ValidationIssue, ValidationLevel,
};
use medic_monitor::Aggregator;
use medic_remedy::ComponentStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::controller::{Collaborators, ControllerError, SessionController, SuiteRegistry};
use crate::load_generator::{LoadGenerator, LoadProfile};
use crate::probe::{CommandProbe, Probe};
use crate::service::{MedicService, ServiceError};

pub const DEFAULT_SETTINGS_PATH: &str = "config/medic.toml";

#[derive(Debug, Parser)]
#[command(name = "medic")]
#[command(about = "Run test sessions with live monitoring and self-healing remediation")]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check a session plan without running it
    Validate(ValidateArgs),
    /// Run a session plan to completion
    Run(RunArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ValidateArgs {
    /// Session plan (TOML)
    #[arg(short, long)]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Session plan (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Daemon settings; defaults to config/medic.toml when present
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Print the session report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read plan {path}: {source}")]
    ReadPlan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse plan {path}: {source}")]
    ParsePlan {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("plan has {errors} validation error(s)")]
    InvalidPlan { errors: usize },
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("failed to render report: {0}")]
    Render(#[from] serde_json::Error),
}

/// Probe definitions carried next to each suite in a session plan.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProbePlan {
    #[serde(default)]
    pub suites: Vec<SuiteProbes>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SuiteProbes {
    pub id: String,
    #[serde(default)]
    pub units: Vec<CommandUnit>,
    #[serde(default)]
    pub load: Option<LoadProfile>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandUnit {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl ProbePlan {
    pub fn into_registry(self) -> SuiteRegistry {
        let generator = LoadGenerator::scripted();
        let mut registry = SuiteRegistry::new();
        for suite in self.suites {
            let mut probes: Vec<Arc<dyn Probe>> = suite
                .units
                .into_iter()
                .map(|unit| {
                    let mut probe = CommandProbe::new(unit.id, unit.command);
                    if let Some(name) = unit.name {
                        probe = probe.with_name(name);
                    }
                    if let Some(dir) = unit.working_dir {
                        probe = probe.with_working_dir(dir);
                    }
                    Arc::new(probe) as Arc<dyn Probe>
                })
                .collect();
            if let Some(profile) = suite.load {
                probes.extend(generator.probes(&suite.id, profile));
            }
            registry.register(suite.id, probes);
        }
        registry
    }
}

/// A plan file is a `TestConfiguration` whose `[[suites]]` entries also carry
/// `[[suites.units]]` command probes and an optional `[suites.load]` profile.
pub fn parse_plan(contents: &str) -> Result<(TestConfiguration, SuiteRegistry), toml::de::Error> {
    let config = parse_test_configuration(contents)?;
    let probes: ProbePlan = toml::from_str(contents)?;
    Ok((config, probes.into_registry()))
}

pub fn load_plan(path: &Path) -> Result<(TestConfiguration, SuiteRegistry), CliError> {
    let body = std::fs::read_to_string(path).map_err(|source| CliError::ReadPlan {
        path: path.to_path_buf(),
        source,
    })?;
    parse_plan(&body).map_err(|source| CliError::ParsePlan {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_settings(path: Option<&Path>) -> Result<MedicSettings, CliError> {
    match path {
        Some(path) => Ok(load_settings(path)?),
        None if Path::new(DEFAULT_SETTINGS_PATH).exists() => {
            Ok(load_settings(DEFAULT_SETTINGS_PATH)?)
        }
        None => Ok(MedicSettings::default()),
    }
}

/// All validation issues of the plan at `args.config`.
pub fn validate_plan(args: &ValidateArgs) -> Result<Vec<ValidationIssue>, CliError> {
    let (config, registry) = load_plan(&args.config)?;
    let controller = SessionController::new(
        registry,
        Collaborators::new(Arc::new(Aggregator::new(MonitorConfig::default()))),
        ControllerConfig::default(),
    );
    Ok(controller.validation_issues(&config))
}

pub fn render_issues(issues: &[ValidationIssue]) -> String {
    if issues.is_empty() {
        return "plan is valid\n".to_string();
    }
    let mut out = String::new();
    for issue in issues {
        let level = match issue.level {
            ValidationLevel::Error => "error",
            ValidationLevel::Warning => "warning",
        };
        let _ = writeln!(out, "{level}[{}] {}: {}", issue.code, issue.field, issue.message);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub summary: SessionSummary,
    pub results: Vec<TestResult>,
    pub fixes: Vec<FixRecord>,
    pub snapshot: MonitoringSnapshot,
}

pub async fn run_session(args: &RunArgs) -> Result<SessionReport, CliError> {
    let settings = resolve_settings(args.settings.as_deref())?;
    let (config, registry) = load_plan(&args.config)?;
    let service = MedicService::init(settings, registry, Arc::new(ComponentStore::new()))?;

    let controller = service.controller();
    let id = controller.start(config)?;
    let summary = tokio::select! {
        summary = controller.wait(&id) => summary?,
        _ = tokio::signal::ctrl_c() => {
            warn!(session_id = %id, "interrupted; cancelling session");
            controller.cancel(&id)?;
            controller.wait(&id).await?
        }
    };

    let report = SessionReport {
        results: controller.results(&id)?,
        fixes: service.fix_history(Some(&id)),
        snapshot: service.snapshot(),
        summary,
    };
    service.shutdown().await;
    info!(session_id = %id, state = %report.summary.state, "session report ready");
    Ok(report)
}

pub fn render_json(report: &SessionReport) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(report)?)
}

pub fn render_text(report: &SessionReport) -> String {
    let summary = &report.summary;
    let progress = &summary.progress;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "session {} ({}, {}): {}",
        summary.session_id, summary.config_id, summary.environment, summary.state
    );
    let _ = writeln!(
        out,
        "units: {} total, {} passed, {} failed, {} errored, {} skipped",
        progress.total, progress.passed, progress.failed, progress.errored, progress.skipped
    );
    if let Some(duration_ms) = summary.duration_ms() {
        let _ = writeln!(out, "duration: {duration_ms}ms");
    }
    if let Some(reason) = &summary.failure_reason {
        let _ = writeln!(out, "failure: {reason}");
    }
    let _ = writeln!(
        out,
        "health: {:.1} ({}), error rate {:.1}%, p95 {:.0}ms",
        report.snapshot.health_score,
        report.snapshot.status.as_str(),
        report.snapshot.error_rate,
        report.snapshot.latency.p95
    );
    let _ = writeln!(
        out,
        "errors: {}, fixes: {} committed, {} rolled back, {} skipped",
        summary.errors_detected,
        summary.fixes_committed,
        summary.fixes_rolled_back,
        summary.fixes_skipped
    );

    for result in report.results.iter().filter(|result| result.is_failure()) {
        let _ = writeln!(
            out,
            "  {} {}/{}: {}",
            result.status,
            result.suite_id,
            result.id,
            result.message.as_deref().unwrap_or("-")
        );
    }
    for fix in &report.fixes {
        let _ = writeln!(out, "  fix {} [{}] {}", fix.id, fix.status, fix.summary);
    }
    out
}
