//! Repository working copies and source-control events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::Result;

/// Provides the working directory a job's pipeline runs in.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Identifies the working copy used for `name`. Names with the same key
    /// share a directory, so their runs must not overlap.
    fn lock_key(&self, name: &str) -> String {
        name.to_string()
    }

    /// Make sure a usable working copy named `name` exists and return its path.
    ///
    /// With a `url` the copy is cloned or brought up to date; without one
    /// an empty directory is enough.
    async fn ensure_repo(&self, url: Option<&str>, name: &str) -> Result<PathBuf>;
}

/// A normalized source-control event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    pub action: Option<String>,
    pub pr_number: Option<u64>,
    pub head_ref: Option<String>,
    pub base_ref: Option<String>,
    pub clone_url: Option<String>,
}

impl TriggerEvent {
    /// Extract the pull request fields from a GitHub-style webhook payload.
    pub fn from_github_payload(payload: &serde_json::Value) -> Self {
        let pr = payload.get("pull_request");
        let field = |path: &[&str]| -> Option<String> {
            let mut value = pr?;
            for &key in path {
                value = value.get(key)?;
            }
            value.as_str().map(|s| s.to_string())
        };

        Self {
            action: payload
                .get("action")
                .and_then(|a| a.as_str())
                .map(|s| s.to_string()),
            pr_number: pr.and_then(|p| p.get("number")).and_then(|n| n.as_u64()),
            head_ref: field(&["head", "ref"]),
            base_ref: field(&["base", "ref"]),
            clone_url: field(&["head", "repo", "clone_url"]),
        }
    }

    /// The branch a run for this event should build against.
    pub fn target_branch(&self) -> Option<&str> {
        self.base_ref.as_deref().or(self.head_ref.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_github_payload() {
        let payload = json!({
            "action": "opened",
            "pull_request": {
                "number": 42,
                "head": {
                    "ref": "feature/login",
                    "repo": { "clone_url": "https://example.com/app.git" }
                },
                "base": { "ref": "main" }
            }
        });

        let event = TriggerEvent::from_github_payload(&payload);
        assert_eq!(event.action.as_deref(), Some("opened"));
        assert_eq!(event.pr_number, Some(42));
        assert_eq!(event.head_ref.as_deref(), Some("feature/login"));
        assert_eq!(event.base_ref.as_deref(), Some("main"));
        assert_eq!(event.clone_url.as_deref(), Some("https://example.com/app.git"));
        assert_eq!(event.target_branch(), Some("main"));
    }

    #[test]
    fn test_from_payload_without_pull_request() {
        let event = TriggerEvent::from_github_payload(&json!({ "zen": "Keep it simple." }));
        assert_eq!(event, TriggerEvent::default());
        assert_eq!(event.target_branch(), None);
    }
}
