//! Cron trigger scheduler.
//!
//! Owns the set of active schedules and submits due jobs to the queue with
//! empty parameters, the same way a manual trigger would.

use crate::cron::CronSchedule;
use crate::queue::JobQueue;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

#[derive(Debug)]
struct ScheduledJob {
    schedule: CronSchedule,
    next_fire: Option<DateTime<Utc>>,
}

/// Fires scheduled jobs at their cron due times.
pub struct TriggerScheduler {
    queue: Arc<JobQueue>,
    tick: Duration,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
}

impl TriggerScheduler {
    pub fn new(queue: Arc<JobQueue>, tick: Duration) -> Self {
        Self {
            queue,
            tick,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Start firing `job_id` on `schedule`, replacing any previous schedule
    /// for that job.
    pub fn schedule(&self, job_id: &str, schedule: CronSchedule) {
        self.schedule_at(job_id, schedule, Utc::now());
    }

    /// Like [`schedule`](Self::schedule), with the first due time computed
    /// from `now`.
    pub fn schedule_at(&self, job_id: &str, schedule: CronSchedule, now: DateTime<Utc>) {
        let next_fire = schedule.next_after(&now);
        info!(job_id = %job_id, cron = %schedule.expression(), next_fire = ?next_fire, "Scheduled job");
        self.lock().insert(
            job_id.to_string(),
            ScheduledJob {
                schedule,
                next_fire,
            },
        );
    }

    /// Drop the schedule of a job that was re-registered without one.
    pub(crate) fn remove(&self, job_id: &str) {
        if self.lock().remove(job_id).is_some() {
            info!(job_id = %job_id, "Removed schedule of re-registered job");
        }
    }

    /// Next due time of every scheduled job, ordered by job id.
    pub fn next_fires(&self) -> Vec<(String, Option<DateTime<Utc>>)> {
        let mut fires: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, job)| (id.clone(), job.next_fire))
            .collect();
        fires.sort();
        fires
    }

    /// Submit every job whose due time is at or before `now` and advance it
    /// to its next due time after `now`. Fires missed while the scheduler was
    /// not ticking collapse into a single submission.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut due = Vec::new();
        {
            let mut jobs = self.lock();
            for (id, job) in jobs.iter_mut() {
                if let Some(next) = job.next_fire {
                    if next <= now {
                        due.push((next, id.clone()));
                        job.next_fire = job.schedule.next_after(&now);
                    }
                }
            }
        }
        due.sort();

        due.into_iter()
            .map(|(scheduled_for, job_id)| {
                info!(job_id = %job_id, %scheduled_for, "Cron trigger fired");
                self.queue.submit(job_id.clone(), HashMap::new());
                job_id
            })
            .collect()
    }

    /// Tick until `shutdown` flips to true or its sender goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = self.tick.as_millis() as u64, "Starting trigger scheduler");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    let fired = self.fire_due(Utc::now());
                    if !fired.is_empty() {
                        debug!(count = fired.len(), "Submitted scheduled jobs");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Trigger scheduler stopped");
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ScheduledJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
