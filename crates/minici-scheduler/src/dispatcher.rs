//! Dispatcher - owns the queue, registry, trigger scheduler and workers.

use crate::orchestrator::PipelineRunner;
use crate::queue::JobQueue;
use crate::registry::JobRegistry;
use crate::trigger::TriggerScheduler;
use crate::worker::{Worker, WorkerContext};
use futures::future::join_all;
use minici_config::Settings;
use minici_core::executor::Executor;
use minici_core::job::{JobConfig, JobDefinition, QueueItem, QueueSnapshot};
use minici_core::notify::Notifier;
use minici_core::repository::{TriggerEvent, Workspace};
use minici_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Pull request actions that start builds. Events without an action count
/// as a push.
const BUILD_ACTIONS: &[&str] = &["opened", "reopened", "synchronize"];

/// Entry point for everything that submits or runs jobs.
pub struct Dispatcher {
    queue: Arc<JobQueue>,
    registry: Arc<JobRegistry>,
    scheduler: Arc<TriggerScheduler>,
    ctx: WorkerContext,
    workers: usize,
    poll_interval: Duration,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(
        settings: &Settings,
        executor: Arc<dyn Executor>,
        workspace: Arc<dyn Workspace>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let queue = Arc::new(JobQueue::new());
        let scheduler = Arc::new(TriggerScheduler::new(queue.clone(), settings.scheduler_tick));
        let registry = Arc::new(JobRegistry::new(scheduler.clone()));
        let runner = PipelineRunner::new(executor).with_stage_timeout(settings.stage_timeout);
        let ctx = WorkerContext::new(
            queue.clone(),
            registry.clone(),
            runner,
            workspace,
            notifier,
        );
        let (shutdown, _) = watch::channel(false);

        Self {
            queue,
            registry,
            scheduler,
            ctx,
            workers: settings.workers.max(1),
            poll_interval: settings.poll_interval,
            shutdown,
            tasks: Vec::new(),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<TriggerScheduler> {
        &self.scheduler
    }

    pub fn register(&self, definition: JobDefinition) -> Result<JobConfig> {
        self.registry.register(definition)
    }

    pub fn lookup(&self, job_id: &str) -> Option<JobConfig> {
        self.registry.lookup(job_id)
    }

    pub fn list_jobs(&self) -> Vec<JobConfig> {
        self.registry.list()
    }

    /// Submit a run without checking that the job exists. Workers drop items
    /// for unknown jobs.
    pub fn submit(&self, job_id: impl Into<String>, params: HashMap<String, String>) -> QueueItem {
        self.queue.submit(job_id, params)
    }

    /// Manually trigger a registered job.
    pub fn trigger(&self, job_id: &str, params: HashMap<String, String>) -> Result<QueueItem> {
        if self.registry.lookup(job_id).is_none() {
            return Err(Error::NotFound(format!("job {}", job_id)));
        }
        info!(job_id = %job_id, "Manual trigger");
        Ok(self.queue.submit(job_id, params))
    }

    /// Submit every job watching the branch an event targets. Returns the ids
    /// of the submitted jobs.
    pub fn handle_event(&self, event: &TriggerEvent) -> Vec<String> {
        if let Some(action) = event.action.as_deref() {
            if !BUILD_ACTIONS.contains(&action) {
                info!(action = %action, "Ignoring event action");
                return Vec::new();
            }
        }

        let Some(branch) = event.target_branch() else {
            warn!("Event names no branch, nothing to build");
            return Vec::new();
        };

        let params = event_params(event);
        let submitted: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|job| job.watches_branch(branch))
            .map(|job| {
                self.queue.submit(job.id.clone(), params.clone());
                job.id
            })
            .collect();

        info!(branch = %branch, jobs = submitted.len(), pr = ?event.pr_number, "Handled event");
        submitted
    }

    pub fn inspect(&self) -> QueueSnapshot {
        self.queue.inspect()
    }

    /// Spawn the trigger scheduler and the configured number of workers.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            warn!("Dispatcher already started");
            return;
        }

        info!(workers = self.workers, "Starting dispatcher");

        let scheduler = self.scheduler.clone();
        let rx = self.shutdown.subscribe();
        self.tasks.push(tokio::spawn(async move { scheduler.run(rx).await }));

        for n in 0..self.workers {
            let worker = Worker::new(format!("worker-{}", n), self.ctx.clone(), self.poll_interval);
            let rx = self.shutdown.subscribe();
            self.tasks.push(tokio::spawn(async move { worker.run(rx).await }));
        }
    }

    /// Stop the scheduler and workers, letting runs in progress finish.
    /// Items still queued are dropped with the process.
    pub async fn shutdown(&mut self) {
        info!(pending = self.queue.len(), "Shutting down dispatcher");
        let _ = self.shutdown.send(true);

        for result in join_all(self.tasks.drain(..)).await {
            if let Err(e) = result {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

/// Parameters handed to runs started by an event. Only fields present on the
/// event are set.
fn event_params(event: &TriggerEvent) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let fields = [
        ("CI_EVENT_ACTION", event.action.clone()),
        ("CI_PR_NUMBER", event.pr_number.map(|n| n.to_string())),
        ("CI_HEAD_REF", event.head_ref.clone()),
        ("CI_BASE_REF", event.base_ref.clone()),
        ("CI_CLONE_URL", event.clone_url.clone()),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            params.insert(key.to_string(), value);
        }
    }
    params
}
