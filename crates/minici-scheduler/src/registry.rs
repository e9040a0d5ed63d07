//! Job registry.

use crate::cron::CronSchedule;
use crate::trigger::TriggerScheduler;
use minici_core::ResourceId;
use minici_core::Result;
use minici_core::job::{JobConfig, JobDefinition};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Jobs {
    by_id: HashMap<String, JobConfig>,
    /// Ids in first-registration order.
    order: Vec<String>,
}

/// Holds every registered job for the lifetime of the process and hands
/// their cron schedules to the trigger scheduler.
pub struct JobRegistry {
    jobs: RwLock<Jobs>,
    scheduler: Arc<TriggerScheduler>,
}

impl JobRegistry {
    pub fn new(scheduler: Arc<TriggerScheduler>) -> Self {
        Self {
            jobs: RwLock::new(Jobs::default()),
            scheduler,
        }
    }

    /// Store a job, generating its id if it has none.
    ///
    /// An invalid cron expression rejects the whole registration and nothing
    /// is stored. Registering an existing id replaces that job (and its
    /// schedule) without complaint.
    pub fn register(&self, mut definition: JobDefinition) -> Result<JobConfig> {
        let schedule = definition
            .schedule_cron
            .as_deref()
            .map(CronSchedule::parse)
            .transpose()?;

        let id = definition
            .id
            .take()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| ResourceId::new().to_string());
        let config = JobConfig::from_definition(id.clone(), definition);

        {
            // Held across the scheduler update so concurrent registrations of
            // one id leave the stored job and its schedule in agreement.
            let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
            if jobs.by_id.insert(id.clone(), config.clone()).is_some() {
                warn!(job_id = %id, "Overwriting existing job");
            } else {
                jobs.order.push(id.clone());
            }

            match schedule {
                Some(schedule) => self.scheduler.schedule(&id, schedule),
                None => self.scheduler.remove(&id),
            }
        }

        info!(
            job_id = %id,
            job = %config.name,
            stages = config.pipeline.stages.len(),
            cron = ?config.schedule_cron,
            "Registered job"
        );
        Ok(config)
    }

    pub fn lookup(&self, id: &str) -> Option<JobConfig> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(id)
            .cloned()
    }

    /// All jobs in registration order.
    pub fn list(&self) -> Vec<JobConfig> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.order
            .iter()
            .filter_map(|id| jobs.by_id.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
