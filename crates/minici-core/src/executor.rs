//! Executor trait.
//!
//! Executors run a single stage as an external process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::pipeline::{Stage, StageResult};

/// Stage timeout applied when neither the stage nor the caller sets one.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(600);

/// Output recorded for a stage that was killed on timeout.
pub const TIMEOUT_OUTPUT: &str = "(timeout)";

/// Trait for stage executors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Run a stage in `workdir` and wait for it, for at most `timeout`.
    ///
    /// `params` are layered over the stage's own environment. Failures to
    /// launch are reported as a failed [`StageResult`], never as an error.
    async fn execute(
        &self,
        stage: &Stage,
        workdir: &Path,
        params: &HashMap<String, String>,
        timeout: Duration,
    ) -> StageResult;
}
