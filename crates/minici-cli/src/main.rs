//! MiniCI CLI tool.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use minici_config::Settings;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod notify;

#[derive(Parser)]
#[command(name = "minici")]
#[command(about = "MiniCI pipeline orchestrator", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "minici.yaml")]
        path: String,
    },
    /// Run a pipeline once in the foreground
    Run {
        /// Path to the configuration file
        #[arg(default_value = "minici.yaml")]
        path: String,
        /// Directory to run stages in (defaults to the file's directory)
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Parameter passed to every stage, as KEY=VALUE
        #[arg(short, long = "param")]
        params: Vec<String>,
        /// Timeout in seconds for stages that do not set one
        #[arg(long, default_value = "600")]
        timeout: u64,
    },
    /// Load job documents and run them on their triggers until Ctrl-C
    Serve {
        #[command(flatten)]
        jobs: JobArgs,
        /// Queue every job once at startup
        #[arg(long)]
        run_now: bool,
    },
    /// Run the jobs selected by a webhook payload and wait for them
    Event {
        #[command(flatten)]
        jobs: JobArgs,
        /// Path to a GitHub-style pull request payload (JSON)
        payload: String,
    },
}

#[derive(Args)]
struct JobArgs {
    /// Directory containing job documents
    #[arg(long, env = "MINICI_JOBS_DIR", default_value = "jobs")]
    jobs: PathBuf,
    /// Directory holding per-job working copies
    #[arg(long)]
    repo_base_path: Option<PathBuf>,
    /// Number of queue workers
    #[arg(long)]
    workers: Option<usize>,
    /// Default stage timeout in seconds
    #[arg(long)]
    stage_timeout: Option<u64>,
    /// URL receiving run reports as JSON
    #[arg(long)]
    notify_webhook_url: Option<String>,
}

impl JobArgs {
    /// `MINICI_*` environment settings with command-line flags applied on top.
    fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = Settings::from_env().context("Invalid MINICI_* settings")?;
        if let Some(path) = &self.repo_base_path {
            settings.repo_base_path = path.clone();
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(secs) = self.stage_timeout {
            settings.stage_timeout = Duration::from_secs(secs);
        }
        if let Some(url) = &self.notify_webhook_url {
            settings.notify_webhook_url = Some(url.clone());
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Run {
            path,
            workdir,
            params,
            timeout,
        } => {
            let params = commands::parse_params(&params)?;
            commands::run::run_local(&path, workdir, params, Duration::from_secs(timeout)).await?;
        }
        Commands::Serve { jobs, run_now } => {
            commands::serve::serve(jobs.settings()?, &jobs.jobs, run_now).await?;
        }
        Commands::Event { jobs, payload } => {
            commands::serve::event(jobs.settings()?, &jobs.jobs, &payload).await?;
        }
    }

    Ok(())
}
