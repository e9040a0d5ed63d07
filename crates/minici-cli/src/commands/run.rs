//! Local pipeline execution command.

use anyhow::{Context, Result};
use minici_config::parse_pipeline;
use minici_core::pipeline::{RunStatus, StageStatus};
use minici_executor::LocalExecutor;
use minici_scheduler::{PipelineEvent, PipelineRunner};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Run a pipeline file once in the foreground.
pub async fn run_local(
    config_path: &str,
    workdir: Option<PathBuf>,
    params: HashMap<String, String>,
    stage_timeout: Duration,
) -> Result<()> {
    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path))?;

    let pipeline = parse_pipeline(&content)
        .with_context(|| format!("Failed to parse pipeline config: {}", config_path))?;

    println!("Running pipeline: {}", pipeline.name);
    println!("Stages: {}", pipeline.stages.len());

    // Default to the directory containing the config file
    let working_dir = match workdir {
        Some(dir) => dir,
        None => Path::new(config_path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf(),
    }
    .canonicalize()
    .context("Failed to resolve working directory")?;

    println!("Working directory: {}", working_dir.display());

    let runner = PipelineRunner::new(Arc::new(LocalExecutor::new())).with_stage_timeout(stage_timeout);

    let mut env = params;
    env.entry("CI".to_string()).or_insert_with(|| "true".to_string());

    println!("\n--- Starting pipeline execution ---\n");

    let (mut rx, result_handle) = runner.execute(pipeline, working_dir, env);

    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::StageStarted { stage } => {
                println!("▶ Stage '{}' started", stage);
            }
            PipelineEvent::StageCompleted { result } => {
                for line in result.output.lines() {
                    println!("  [{}] {}", result.name, line);
                }
                match result.status {
                    StageStatus::Success => {
                        println!("✓ Stage '{}' completed successfully\n", result.name)
                    }
                    StageStatus::Failed => println!(
                        "✗ Stage '{}' failed (exit code {})\n",
                        result.name,
                        result.exit_code.map_or("-".to_string(), |c| c.to_string())
                    ),
                    StageStatus::TimedOut => println!("⏱ Stage '{}' timed out\n", result.name),
                }
            }
            PipelineEvent::PipelineCompleted { status } => match status {
                RunStatus::Success => println!("--- Pipeline completed successfully ---"),
                RunStatus::Failed => println!("--- Pipeline failed ---"),
            },
        }
    }

    let report = result_handle
        .await
        .context("Pipeline execution task failed")?;

    println!("\n--- Stage Summary ---");
    for stage in &report.stages {
        println!(
            "  {} - {} ({:.1}s)",
            stage.name, stage.status, stage.duration_seconds
        );
    }

    if report.is_success() {
        println!("\n✓ Pipeline succeeded!");
        Ok(())
    } else {
        anyhow::bail!("Pipeline failed");
    }
}
