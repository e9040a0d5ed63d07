//! Notification sinks for finished runs.

use async_trait::async_trait;
use futures::future::join_all;
use minici_core::job::RunNotification;
use minici_core::notify::Notifier;
use minici_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Logs a one-line summary of every run.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, notification: &RunNotification) -> Result<()> {
        let report = &notification.result;
        info!(
            job_id = %notification.job.id,
            job = %notification.job.name,
            status = %report.status,
            stages = report.stages.len(),
            error = ?report.error,
            "Run finished"
        );
        Ok(())
    }
}

/// POSTs every notification as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("MiniCI")
            .build()
            .map_err(|e| Error::Notification(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, notification: &RunNotification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("POST {} failed: {}", self.url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!(
                "POST {} returned {}: {}",
                self.url, status, text
            )));
        }
        Ok(())
    }
}

/// Forwards notifications to a channel, for commands that wait on runs.
pub struct ChannelNotifier(mpsc::UnboundedSender<RunNotification>);

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn notify(&self, notification: &RunNotification) -> Result<()> {
        self.0
            .send(notification.clone())
            .map_err(|_| Error::Notification("receiver closed".to_string()))
    }
}

/// Delivers to every sink concurrently. A failing sink is logged and does
/// not keep the others from being notified.
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    fn name(&self) -> &'static str {
        "fanout"
    }

    async fn notify(&self, notification: &RunNotification) -> Result<()> {
        let results = join_all(self.sinks.iter().map(|sink| sink.notify(notification))).await;

        let mut failed = 0;
        for (sink, result) in self.sinks.iter().zip(results) {
            if let Err(e) = result {
                warn!(sink = sink.name(), error = %e, "Notification sink failed");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(Error::Notification(format!(
                "{} of {} sinks failed",
                failed,
                self.sinks.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minici_core::job::{JobConfig, JobDefinition};
    use minici_core::pipeline::{DEFAULT_AGENT, PipelineDefinition, RunReport, Stage};

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn notify(&self, _notification: &RunNotification) -> Result<()> {
            Err(Error::Notification("down".to_string()))
        }
    }

    fn notification() -> RunNotification {
        let pipeline = PipelineDefinition {
            name: "ci".to_string(),
            agent_label: DEFAULT_AGENT.to_string(),
            stages: vec![Stage::new("build", "make")],
        };
        RunNotification {
            job: JobConfig::from_definition("app".to_string(), JobDefinition::new("app", pipeline)),
            result: RunReport::aborted("ci", "clone failed"),
        }
    }

    #[tokio::test]
    async fn test_fanout_delivers_despite_failing_sink() {
        let (channel, mut rx) = ChannelNotifier::new();
        let fanout = FanoutNotifier::new(vec![
            Arc::new(Failing),
            Arc::new(LogNotifier),
            Arc::new(channel),
        ]);

        let result = fanout.notify(&notification()).await;
        assert!(matches!(result, Err(Error::Notification(_))));

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.job.id, "app");
    }

    #[tokio::test]
    async fn test_webhook_reports_unreachable_endpoint() {
        // Port 9 (discard) is almost never listening on localhost.
        let webhook = WebhookNotifier::new("http://127.0.0.1:9/hook").unwrap();
        let result = webhook.notify(&notification()).await;
        assert!(matches!(result, Err(Error::Notification(_))));
    }
}
