use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use conductor::store::issues::IssueStore;
use conductor::store::tasks::TaskStore;
use conductor::{
    CommandExecutor, EngineConfig, FileBacklogPlanner, IssueStatus, Run, RunHalt, TaskStatus,
};

#[derive(Parser)]
#[command(name = "conductor", version, about = "Task orchestration engine")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed tasks from a backlog document and run them to completion.
    Run {
        /// Backlog document (JSON) to decompose into tasks.
        backlog: PathBuf,

        /// Worker command invoked once per task.
        #[arg(long, default_value = "conductor-worker")]
        worker: String,

        /// Extra arguments passed to the worker command.
        #[arg(long = "worker-arg")]
        worker_args: Vec<String>,

        /// Directory for persisted task/issue state.
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Stop after this many scheduling loops; rerun against the same
        /// state directory to continue where the run paused.
        #[arg(long)]
        loops: Option<u32>,
    },
    /// Summarize persisted task and issue state.
    Status {
        /// Directory holding persisted task/issue state.
        #[arg(long)]
        state_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match cli.command {
        Command::Run {
            backlog,
            worker,
            worker_args,
            state_dir,
            loops,
        } => {
            let mut config = EngineConfig::load(cli.config.as_deref())?;
            if let Some(dir) = state_dir {
                config = config.with_state_dir(dir);
            }

            let planner = Arc::new(FileBacklogPlanner::new());
            let executor = Arc::new(CommandExecutor::new(worker).with_args(worker_args));
            let mut run = Run::new(config, planner, executor)?;
            if let Some(loops) = loops {
                run = run.with_loop_limit(loops);
            }
            run.seed(backlog).await?;

            let abort = run.abort_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received; aborting run");
                    abort.abort();
                }
            });

            let report = run.execute().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(match report.halt {
                // A paused run is not a failure; the operator asked for it.
                RunHalt::Completed | RunHalt::LoopLimit => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            })
        }
        Command::Status { state_dir } => {
            let tasks = TaskStore::open(&state_dir)?;
            let issues = IssueStore::open(&state_dir)?;

            println!("tasks:");
            for status in [
                TaskStatus::Pending,
                TaskStatus::InProgress,
                TaskStatus::Blocked,
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Aborted,
            ] {
                println!("  {status}: {}", tasks.count_by_status(status));
            }
            println!("issues:");
            for status in [
                IssueStatus::Pending,
                IssueStatus::Accepted,
                IssueStatus::InProgress,
                IssueStatus::Completed,
                IssueStatus::WontFix,
            ] {
                println!("  {status}: {}", issues.count_by_status(status));
            }
            // Anomaly counters live in the last run checkpoint, if any.
            if let Ok(raw) = std::fs::read_to_string(state_dir.join("checkpoint.json")) {
                let checkpoint: serde_json::Value = serde_json::from_str(&raw)?;
                if let Some(anomalies) = checkpoint.get("anomalies") {
                    println!("anomalies: {anomalies}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
