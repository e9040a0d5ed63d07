//! Pipeline, stage and run report definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Agent label used when a pipeline document does not name one.
pub const DEFAULT_AGENT: &str = "local";

/// A parsed pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    /// Pipeline name.
    pub name: String,
    /// Label of the agent expected to run this pipeline.
    pub agent_label: String,
    /// Stages in execution order. Never empty once parsed.
    pub stages: Vec<Stage>,
}

/// A stage in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name.
    pub name: String,
    /// Shell command line, handed to `sh -c` verbatim.
    pub command: String,
    /// Stage-specific environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Overrides the runner's default stage timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Stage {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            env: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Success,
    Failed,
    TimedOut,
}

impl StageStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Success)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Success => write!(f, "SUCCESS"),
            StageStatus::Failed => write!(f, "FAILED"),
            StageStatus::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// Result of a stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    /// Stage name.
    pub name: String,
    /// Final status.
    pub status: StageStatus,
    /// Wall-clock time from spawn to exit or forced termination.
    pub duration_seconds: f64,
    /// Combined stdout and stderr.
    pub output: String,
    /// Exit code. Absent when the stage timed out.
    pub exit_code: Option<i32>,
}

impl StageResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "SUCCESS"),
            RunStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Report of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub pipeline_name: String,
    pub status: RunStatus,
    /// Executed stages, ending at the first one that did not succeed.
    pub stages: Vec<StageResult>,
    /// Why the run failed before any stage could execute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    /// A run that failed before its first stage.
    pub fn aborted(pipeline_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            status: RunStatus::Failed,
            stages: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Success)
    }
}
