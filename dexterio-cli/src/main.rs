//! Dexterio CLI — run backtests and inspect jobs.
//!
//! Exit codes: 0 success, 2 invalid configuration, 3 data not found,
//! 4 timeout, 5 runtime error during simulation.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dexterio_runner::{paths, runner, JobManager, RunConfig, RunError};

#[derive(Parser)]
#[command(name = "dexterio", about = "Intraday backtest engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a backtest from a TOML config file, in-process.
    Run {
        /// Path to the run configuration.
        #[arg(long)]
        config: PathBuf,
        /// Override the repo root (otherwise resolved automatically).
        #[arg(long)]
        repo_root: Option<PathBuf>,
    },
    /// Submit a backtest to the job runner and wait for it.
    Submit {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        repo_root: Option<PathBuf>,
    },
    /// List recent jobs.
    Jobs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        repo_root: Option<PathBuf>,
    },
    /// Reset stale running jobs left behind by a dead process.
    ResetStale {
        #[arg(long)]
        repo_root: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match dispatch() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            match e.downcast_ref::<RunError>() {
                Some(run_err) => ExitCode::from(run_err.exit_code() as u8),
                None => ExitCode::from(5),
            }
        }
    }
}

fn resolve_root(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| paths::repo_root().to_path_buf())
}

fn dispatch() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config, repo_root } => {
            let root = resolve_root(repo_root);
            let config = RunConfig::from_file(&config)?;
            let outcome = runner::run(&config, &root, None)?;
            let summary = serde_json::to_string_pretty(&outcome.metrics)?;
            println!("{summary}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Submit { config, repo_root } => {
            let root = resolve_root(repo_root);
            let config = RunConfig::from_file(&config)?;
            let manager = JobManager::new(&root, paths::results_root(&root));
            let job_id = manager.submit(config)?;
            println!("{job_id}");
            manager.wait(&job_id);

            let record = manager.status(&job_id)?;
            match record.error {
                None => Ok(ExitCode::SUCCESS),
                Some(err) => {
                    eprintln!("job failed ({}): {}", err.kind, err.message);
                    let code = match err.kind.as_str() {
                        "timeout" => 4,
                        "invalid_config" | "playbook_config_invalid" | "unknown_mode" => 2,
                        k if k.starts_with("data") => 3,
                        _ => 5,
                    };
                    Ok(ExitCode::from(code))
                }
            }
        }
        Command::Jobs { limit, repo_root } => {
            let root = resolve_root(repo_root);
            let manager = JobManager::new(&root, paths::results_root(&root));
            for job in manager.list(limit)? {
                println!("{}  {:?}  {}  {}", job.job_id, job.status, job.created_at, job.config_summary);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::ResetStale { repo_root } => {
            let root = resolve_root(repo_root);
            let manager = JobManager::new(&root, paths::results_root(&root));
            let reset = manager.reset_stale().context("reset stale jobs")?;
            println!("{{\"reset_count\": {reset}}}");
            Ok(ExitCode::SUCCESS)
        }
    }
}
