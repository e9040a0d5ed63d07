//! Runtime settings.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process-wide settings for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding one working copy per job.
    pub repo_base_path: PathBuf,
    /// Number of queue workers. One worker means at most one run at a time.
    pub workers: usize,
    /// How long an idle worker waits before polling the queue again.
    pub poll_interval: Duration,
    /// How often the trigger scheduler evaluates cron schedules.
    pub scheduler_tick: Duration,
    /// Stage timeout when a stage does not set its own.
    pub stage_timeout: Duration,
    /// Endpoint receiving run reports as JSON, if any.
    pub notify_webhook_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repo_base_path: std::env::temp_dir().join("minici-repos"),
            workers: 1,
            poll_interval: Duration::from_secs(1),
            scheduler_tick: Duration::from_secs(1),
            stage_timeout: Duration::from_secs(600),
            notify_webhook_url: None,
        }
    }
}

impl Settings {
    /// Build settings from `MINICI_*` environment variables, falling back to
    /// the defaults for anything unset.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let mut settings = Self::default();

        if let Some(path) = lookup("MINICI_REPO_BASE_PATH") {
            settings.repo_base_path = PathBuf::from(path);
        }
        if let Some(workers) = lookup("MINICI_WORKERS") {
            settings.workers = parse_number("MINICI_WORKERS", &workers)?;
        }
        if let Some(ms) = lookup("MINICI_POLL_INTERVAL_MS") {
            settings.poll_interval =
                Duration::from_millis(parse_number("MINICI_POLL_INTERVAL_MS", &ms)?);
        }
        if let Some(ms) = lookup("MINICI_SCHEDULER_TICK_MS") {
            settings.scheduler_tick =
                Duration::from_millis(parse_number("MINICI_SCHEDULER_TICK_MS", &ms)?);
        }
        if let Some(secs) = lookup("MINICI_STAGE_TIMEOUT_SECS") {
            settings.stage_timeout =
                Duration::from_secs(parse_number("MINICI_STAGE_TIMEOUT_SECS", &secs)?);
        }
        settings.notify_webhook_url = lookup("MINICI_NOTIFY_WEBHOOK_URL").filter(|u| !u.is_empty());

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "at least one worker is required"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("poll_interval", "must be greater than zero"));
        }
        if self.scheduler_tick.is_zero() {
            return Err(ConfigError::invalid("scheduler_tick", "must be greater than zero"));
        }
        if self.stage_timeout.is_zero() {
            return Err(ConfigError::invalid("stage_timeout", "must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, e.to_string()))
}
