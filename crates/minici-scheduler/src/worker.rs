//! Worker that processes jobs from the queue.

use crate::orchestrator::PipelineRunner;
use crate::queue::JobQueue;
use crate::registry::JobRegistry;
use minici_core::job::{QueueItem, RunNotification};
use minici_core::notify::Notifier;
use minici_core::pipeline::RunReport;
use minici_core::repository::Workspace;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Everything a worker needs to turn a queue item into a finished run.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<JobQueue>,
    pub registry: Arc<JobRegistry>,
    pub runner: PipelineRunner,
    pub workspace: Arc<dyn Workspace>,
    pub notifier: Arc<dyn Notifier>,
    workspace_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl WorkerContext {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<JobRegistry>,
        runner: PipelineRunner,
        workspace: Arc<dyn Workspace>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            queue,
            registry,
            runner,
            workspace,
            notifier,
            workspace_locks: Arc::default(),
        }
    }

    /// Jobs whose names map to the same working copy never run at the same
    /// time, even with several workers.
    fn workspace_lock(&self, job_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.workspace_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(self.workspace.lock_key(job_name))
            .or_default()
            .clone()
    }
}

/// A worker that takes items off the queue one at a time.
#[derive(Clone)]
pub struct Worker {
    id: String,
    ctx: WorkerContext,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(id: impl Into<String>, ctx: WorkerContext, poll_interval: Duration) -> Self {
        Self {
            id: id.into(),
            ctx,
            poll_interval,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the worker loop until `shutdown` flips to true or its sender goes
    /// away. A run in progress is finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.id, "Starting worker");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.ctx.queue.pop() {
                Some(item) => {
                    self.handle(item).await;
                }
                None => {
                    // No jobs available, wait before polling again
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Process one item on its own task so a panic anywhere in the run
    /// cannot take the worker loop down with it.
    pub async fn handle(&self, item: QueueItem) -> Option<RunReport> {
        let job_id = item.job_id.clone();
        let ctx = self.ctx.clone();
        let worker_id = self.id.clone();

        match tokio::spawn(async move { process(&ctx, &worker_id, item).await }).await {
            Ok(report) => report,
            Err(e) => {
                error!(worker_id = %self.id, job_id = %job_id, error = %e, "Job run crashed");
                None
            }
        }
    }
}

/// Run one queue item to completion and notify sinks of the outcome.
///
/// Returns `None` when the item names a job that is not registered.
pub async fn process(ctx: &WorkerContext, worker_id: &str, item: QueueItem) -> Option<RunReport> {
    let Some(job) = ctx.registry.lookup(&item.job_id) else {
        warn!(worker_id = %worker_id, job_id = %item.job_id, "Dropping queue item for unknown job");
        return None;
    };

    let lock = ctx.workspace_lock(&job.name);
    let _guard = lock.lock().await;

    info!(
        worker_id = %worker_id,
        job_id = %job.id,
        job = %job.name,
        waited_ms = (chrono::Utc::now() - item.enqueued_at).num_milliseconds(),
        "Claimed job"
    );

    let report = match ctx
        .workspace
        .ensure_repo(job.repository.as_deref(), &job.name)
        .await
    {
        Ok(workdir) => {
            let params = job.effective_params(&item.params);
            ctx.runner.run(&job.pipeline, &workdir, &params).await
        }
        Err(e) => {
            error!(job_id = %job.id, error = %e, "Failed to prepare working copy");
            RunReport::aborted(&job.pipeline.name, e.to_string())
        }
    };

    info!(job_id = %job.id, status = %report.status, "Run finished");

    let notification = RunNotification {
        job,
        result: report.clone(),
    };
    if let Err(e) = ctx.notifier.notify(&notification).await {
        warn!(
            job_id = %notification.job.id,
            sink = ctx.notifier.name(),
            error = %e,
            "Notification failed"
        );
    }

    Some(report)
}
