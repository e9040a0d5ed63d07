//! Pipeline runner - executes pipeline stages in order, stopping at the first failure.

use minici_core::executor::{DEFAULT_STAGE_TIMEOUT, Executor};
use minici_core::pipeline::{PipelineDefinition, RunReport, RunStatus, StageResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Event emitted during pipeline execution.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted { stage: String },
    StageCompleted { result: StageResult },
    PipelineCompleted { status: RunStatus },
}

/// Runs pipelines stage by stage on an executor.
#[derive(Clone)]
pub struct PipelineRunner {
    executor: Arc<dyn Executor>,
    stage_timeout: Duration,
}

impl PipelineRunner {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    /// Timeout for stages that do not set their own.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    /// Run every stage of `pipeline` in `workdir` and wait for the report.
    pub async fn run(
        &self,
        pipeline: &PipelineDefinition,
        workdir: &Path,
        params: &HashMap<String, String>,
    ) -> RunReport {
        Self::run_inner(
            self.executor.clone(),
            self.stage_timeout,
            pipeline,
            workdir,
            params,
            None,
        )
        .await
    }

    /// Execute a pipeline in the background, returning a channel of events and
    /// a handle to get the final report.
    pub fn execute(
        &self,
        pipeline: PipelineDefinition,
        workdir: PathBuf,
        params: HashMap<String, String>,
    ) -> (mpsc::Receiver<PipelineEvent>, tokio::task::JoinHandle<RunReport>) {
        let (tx, rx) = mpsc::channel(100);
        let executor = self.executor.clone();
        let stage_timeout = self.stage_timeout;

        let handle = tokio::spawn(async move {
            Self::run_inner(executor, stage_timeout, &pipeline, &workdir, &params, Some(tx)).await
        });

        (rx, handle)
    }

    async fn run_inner(
        executor: Arc<dyn Executor>,
        stage_timeout: Duration,
        pipeline: &PipelineDefinition,
        workdir: &Path,
        params: &HashMap<String, String>,
        tx: Option<mpsc::Sender<PipelineEvent>>,
    ) -> RunReport {
        // A dropped receiver only means nobody is watching.
        let emit = |event: PipelineEvent| {
            let tx = tx.clone();
            async move {
                if let Some(tx) = tx {
                    let _ = tx.send(event).await;
                }
            }
        };

        info!(
            pipeline = %pipeline.name,
            executor = executor.name(),
            stages = pipeline.stages.len(),
            "Starting pipeline"
        );

        let mut results = Vec::with_capacity(pipeline.stages.len());
        let mut status = RunStatus::Success;

        for stage in &pipeline.stages {
            emit(PipelineEvent::StageStarted {
                stage: stage.name.clone(),
            })
            .await;

            let timeout = stage.timeout.unwrap_or(stage_timeout);
            let result = executor.execute(stage, workdir, params, timeout).await;

            if result.is_success() {
                info!(stage = %stage.name, duration = result.duration_seconds, "Stage completed successfully");
            } else {
                error!(
                    stage = %stage.name,
                    status = %result.status,
                    exit_code = ?result.exit_code,
                    "Stage failed"
                );
                status = RunStatus::Failed;
            }

            emit(PipelineEvent::StageCompleted {
                result: result.clone(),
            })
            .await;
            results.push(result);

            if status == RunStatus::Failed {
                break;
            }
        }

        info!(pipeline = %pipeline.name, status = %status, "Pipeline finished");
        emit(PipelineEvent::PipelineCompleted { status }).await;

        RunReport {
            pipeline_name: pipeline.name.clone(),
            status,
            stages: results,
            error: None,
        }
    }
}
