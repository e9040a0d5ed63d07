//! Notification sink trait.

use async_trait::async_trait;

use crate::Result;
use crate::job::RunNotification;

/// Receives the outcome of every finished run.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Name of this sink, used in logs.
    fn name(&self) -> &'static str;

    /// Deliver a run outcome. Errors are logged by the caller and never
    /// change the run's result.
    async fn notify(&self, notification: &RunNotification) -> Result<()>;
}
