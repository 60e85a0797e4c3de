use std::process::ExitCode;

use clap::Parser;
use medicd::cli::{
    render_issues, render_json, render_text, run_session, validate_plan, Cli, CliError, Command,
};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "MEDIC_LOG";

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error(transparent)]
    Cli(#[from] CliError),
    #[error("failed to start async runtime: {source}")]
    Runtime {
        #[source]
        source: std::io::Error,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("medic failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, MainError> {
    match cli.command {
        Command::Validate(args) => {
            let issues = validate_plan(&args)?;
            print!("{}", render_issues(&issues));
            let errors = issues.iter().filter(|issue| issue.is_error()).count();
            if errors > 0 {
                return Err(CliError::InvalidPlan { errors }.into());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|source| MainError::Runtime { source })?;
            let report = runtime.block_on(run_session(&args))?;
            if args.json {
                println!("{}", render_json(&report)?);
            } else {
                print!("{}", render_text(&report));
            }
            // Unit failures exit 2; controller errors exit 1.
            if report.summary.has_failures() {
                return Ok(ExitCode::from(2));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
