//! Long-running orchestrator and one-shot event handling.

use crate::notify::{ChannelNotifier, FanoutNotifier, LogNotifier, WebhookNotifier};
use anyhow::{Context, Result};
use minici_config::{Settings, load_jobs_dir};
use minici_core::job::RunNotification;
use minici_core::notify::Notifier;
use minici_core::repository::TriggerEvent;
use minici_executor::{GitWorkspace, LocalExecutor};
use minici_scheduler::Dispatcher;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Notification sinks for the configured settings, plus any extra ones.
fn notifier(settings: &Settings, extra: Vec<Arc<dyn Notifier>>) -> Result<Arc<dyn Notifier>> {
    let mut sinks: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    if let Some(url) = &settings.notify_webhook_url {
        info!(url = %url, "Posting run reports to webhook");
        sinks.push(Arc::new(WebhookNotifier::new(url.clone())?));
    }
    sinks.extend(extra);
    Ok(Arc::new(FanoutNotifier::new(sinks)))
}

/// Build a dispatcher and register every job document found in `jobs_dir`.
fn load(settings: &Settings, jobs_dir: &Path, notifier: Arc<dyn Notifier>) -> Result<Dispatcher> {
    let dispatcher = Dispatcher::new(
        settings,
        Arc::new(LocalExecutor::new()),
        Arc::new(GitWorkspace::new(&settings.repo_base_path)),
        notifier,
    );

    let definitions = load_jobs_dir(jobs_dir)
        .with_context(|| format!("Failed to load jobs from {}", jobs_dir.display()))?;
    for definition in definitions {
        let name = definition.name.clone();
        dispatcher
            .register(definition)
            .with_context(|| format!("Failed to register job '{}'", name))?;
    }

    println!("Registered {} job(s):", dispatcher.registry().len());
    for job in dispatcher.list_jobs() {
        let schedule = job.schedule_cron.as_deref().unwrap_or("manual");
        println!("  {} ({}) - {}", job.id, job.name, schedule);
    }
    Ok(dispatcher)
}

/// Run the orchestrator until Ctrl-C.
pub async fn serve(settings: Settings, jobs_dir: &Path, run_now: bool) -> Result<()> {
    let mut dispatcher = load(&settings, jobs_dir, notifier(&settings, Vec::new())?)?;

    if run_now {
        for job in dispatcher.list_jobs() {
            dispatcher.trigger(&job.id, HashMap::new())?;
        }
    }

    dispatcher.start();
    println!("MiniCI running with {} worker(s), press Ctrl-C to stop", settings.workers);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    dispatcher.shutdown().await;
    Ok(())
}

/// Feed one webhook payload through the trigger policy and wait for the
/// runs it starts.
pub async fn event(settings: Settings, jobs_dir: &Path, payload_path: &str) -> Result<()> {
    let content = std::fs::read_to_string(payload_path)
        .with_context(|| format!("Failed to read payload: {}", payload_path))?;
    let payload: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse payload: {}", payload_path))?;
    let event = TriggerEvent::from_github_payload(&payload);

    let (channel, mut rx) = ChannelNotifier::new();
    let mut dispatcher = load(
        &settings,
        jobs_dir,
        notifier(&settings, vec![Arc::new(channel)])?,
    )?;

    let submitted = dispatcher.handle_event(&event);
    if submitted.is_empty() {
        println!(
            "No jobs watch branch {}",
            event.target_branch().unwrap_or("(none)")
        );
        return Ok(());
    }

    dispatcher.start();
    let outcomes = collect(&mut rx, submitted.len()).await;
    dispatcher.shutdown().await;

    let mut failed = 0;
    for notification in &outcomes {
        println!(
            "  {} - {}",
            notification.job.name, notification.result.status
        );
        if !notification.result.is_success() {
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} run(s) failed", failed, outcomes.len());
    }
    Ok(())
}

async fn collect(
    rx: &mut mpsc::UnboundedReceiver<RunNotification>,
    count: usize,
) -> Vec<RunNotification> {
    let mut outcomes = Vec::with_capacity(count);
    while outcomes.len() < count {
        match rx.recv().await {
            Some(notification) => outcomes.push(notification),
            None => break,
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(repos: &Path) -> Settings {
        Settings {
            repo_base_path: repos.to_path_buf(),
            poll_interval: Duration::from_millis(10),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_event_runs_matching_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = dir.path().join("jobs");
        std::fs::create_dir(&jobs).unwrap();
        std::fs::write(
            jobs.join("main.yaml"),
            r#"
id: main-ci
name: main-ci
branches: [main]
pipeline:
  name: main
  stages:
    - name: check
      run: test "$CI_BASE_REF" = main
"#,
        )
        .unwrap();
        let payload = dir.path().join("payload.json");
        std::fs::write(
            &payload,
            r#"{"action": "opened", "pull_request": {"number": 3, "head": {"ref": "topic"}, "base": {"ref": "main"}}}"#,
        )
        .unwrap();

        let settings = settings(&dir.path().join("repos"));
        event(settings, &jobs, payload.to_str().unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_event_for_unwatched_branch_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("payload.json");
        std::fs::write(&payload, r#"{"pull_request": {"base": {"ref": "release"}}}"#).unwrap();

        let settings = settings(&dir.path().join("repos"));
        event(settings, dir.path(), payload.to_str().unwrap())
            .await
            .unwrap();
    }
}
