//! Job configurations and queue items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::pipeline::{PipelineDefinition, RunReport};

/// Registration input for a job. The id is generated when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub pipeline: PipelineDefinition,
    /// Default parameters, overlaid by per-invocation parameters.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Standard 5-field crontab expression.
    #[serde(default)]
    pub schedule_cron: Option<String>,
    /// Clone URL of the repository the pipeline runs against.
    #[serde(default)]
    pub repository: Option<String>,
    /// Branches whose webhook events select this job.
    #[serde(default)]
    pub branches: Vec<String>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, pipeline: PipelineDefinition) -> Self {
        Self {
            id: None,
            name: name.into(),
            pipeline,
            parameters: HashMap::new(),
            schedule_cron: None,
            repository: None,
            branches: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_schedule(mut self, cron: impl Into<String>) -> Self {
        self.schedule_cron = Some(cron.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_repository(mut self, url: impl Into<String>) -> Self {
        self.repository = Some(url.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branches.push(branch.into());
        self
    }
}

/// A registered job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Assigned once at registration.
    pub id: String,
    pub name: String,
    pub pipeline: PipelineDefinition,
    pub parameters: HashMap<String, String>,
    pub schedule_cron: Option<String>,
    pub repository: Option<String>,
    pub branches: Vec<String>,
}

impl JobConfig {
    /// Build the stored config from a definition and its resolved id.
    pub fn from_definition(id: String, def: JobDefinition) -> Self {
        Self {
            id,
            name: def.name,
            pipeline: def.pipeline,
            parameters: def.parameters,
            schedule_cron: def.schedule_cron,
            repository: def.repository,
            branches: def.branches,
        }
    }

    /// Default parameters with the invocation's parameters applied on top.
    pub fn effective_params(&self, overrides: &HashMap<String, String>) -> HashMap<String, String> {
        let mut params = self.parameters.clone();
        params.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }

    pub fn watches_branch(&self, branch: &str) -> bool {
        self.branches.iter().any(|b| b == branch)
    }
}

/// A pending request to run a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub job_id: String,
    pub params: HashMap<String, String>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(job_id: impl Into<String>, params: HashMap<String, String>) -> Self {
        Self {
            job_id: job_id.into(),
            params,
            enqueued_at: Utc::now(),
        }
    }
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub length: usize,
    pub items: Vec<QueueItem>,
}

/// Payload handed to notification sinks after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunNotification {
    pub job: JobConfig,
    pub result: RunReport,
}
