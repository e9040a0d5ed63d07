//! Working copies for job runs, backed by the `git` CLI.

use async_trait::async_trait;
use minici_core::repository::Workspace;
use minici_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Keeps one working copy per job under a base directory.
///
/// Runs of the same job reuse the same directory, so only one run per job
/// may be in flight at a time.
pub struct GitWorkspace {
    base_dir: PathBuf,
}

impl GitWorkspace {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory used for the job called `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.base_dir.join(dir_name(name))
    }

    async fn clone(&self, url: &str, target: &Path) -> Result<()> {
        if tokio::fs::try_exists(target).await? {
            // Left over from a run without a repository, or a broken clone.
            tokio::fs::remove_dir_all(target).await?;
        }

        info!(url = %url, path = %target.display(), "Cloning repository");
        let target_str = target.to_string_lossy();
        git(&["clone", url, target_str.as_ref()], None).await
    }

    async fn update(&self, target: &Path) -> Result<()> {
        info!(path = %target.display(), "Updating working copy");
        git(&["fetch", "--prune", "origin"], Some(target)).await?;
        git(&["reset", "--hard", "FETCH_HEAD"], Some(target)).await
    }
}

#[async_trait]
impl Workspace for GitWorkspace {
    fn lock_key(&self, name: &str) -> String {
        dir_name(name)
    }

    async fn ensure_repo(&self, url: Option<&str>, name: &str) -> Result<PathBuf> {
        let target = self.path_for(name);
        tokio::fs::create_dir_all(&self.base_dir).await?;

        match url {
            None => {
                tokio::fs::create_dir_all(&target).await?;
            }
            Some(url) if target.join(".git").is_dir() => match origin_url(&target).await {
                Ok(origin) if origin == url => {
                    if let Err(e) = self.update(&target).await {
                        warn!(path = %target.display(), error = %e, "Update failed, cloning again");
                        self.clone(url, &target).await?;
                    }
                }
                Ok(origin) => {
                    info!(path = %target.display(), old = %origin, new = %url, "Repository changed, cloning again");
                    self.clone(url, &target).await?;
                }
                Err(e) => {
                    warn!(path = %target.display(), error = %e, "Cannot read origin, cloning again");
                    self.clone(url, &target).await?;
                }
            },
            Some(url) => self.clone(url, &target).await?,
        }

        debug!(path = %target.display(), "Working copy ready");
        Ok(target)
    }
}

async fn git(args: &[&str], cwd: Option<&Path>) -> Result<()> {
    git_output(args, cwd).await.map(|_| ())
}

/// Run `git` and return its trimmed stdout.
async fn git_output(args: &[&str], cwd: Option<&Path>) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| Error::Workspace(format!("failed to run git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Workspace(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn origin_url(repo: &Path) -> Result<String> {
    git_output(&["remote", "get-url", "origin"], Some(repo)).await
}

/// Turn a job name into a single safe path component.
fn dir_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "job".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn git_sync(args: &[&str], cwd: &Path) {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(cwd)
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    #[test]
    fn test_dir_name_is_a_single_component() {
        assert_eq!(dir_name("my-service"), "my-service");
        assert_eq!(dir_name("../../etc"), "-..-etc");
        assert_eq!(dir_name("a/b c"), "a-b-c");
        assert_eq!(dir_name(".."), "job");
        assert_eq!(dir_name(""), "job");
    }

    #[tokio::test]
    async fn test_scratch_directory_without_repository() {
        let base = tempfile::tempdir().unwrap();
        let workspace = GitWorkspace::new(base.path().join("repos"));

        let path = workspace.ensure_repo(None, "scratch").await.unwrap();
        assert!(path.is_dir());
        assert_eq!(path, base.path().join("repos").join("scratch"));

        // Reuse is fine.
        let again = workspace.ensure_repo(None, "scratch").await.unwrap();
        assert_eq!(path, again);
    }

    #[tokio::test]
    async fn test_clone_then_update() {
        if !git_available() {
            return;
        }

        let origin = tempfile::tempdir().unwrap();
        git_sync(&["init", "-q"], origin.path());
        std::fs::write(origin.path().join("README"), "v1").unwrap();
        git_sync(&["add", "README"], origin.path());
        git_sync(
            &["-c", "user.name=ci", "-c", "user.email=ci@example.com", "commit", "-q", "-m", "v1"],
            origin.path(),
        );

        let base = tempfile::tempdir().unwrap();
        let workspace = GitWorkspace::new(base.path());
        let url = origin.path().to_string_lossy().to_string();

        let path = workspace.ensure_repo(Some(&url), "app").await.unwrap();
        assert_eq!(std::fs::read_to_string(path.join("README")).unwrap(), "v1");

        std::fs::write(origin.path().join("README"), "v2").unwrap();
        git_sync(
            &["-c", "user.name=ci", "-c", "user.email=ci@example.com", "commit", "-q", "-am", "v2"],
            origin.path(),
        );

        let path = workspace.ensure_repo(Some(&url), "app").await.unwrap();
        assert_eq!(std::fs::read_to_string(path.join("README")).unwrap(), "v2");
    }

    fn origin_with(readme: &str) -> tempfile::TempDir {
        let origin = tempfile::tempdir().unwrap();
        git_sync(&["init", "-q"], origin.path());
        std::fs::write(origin.path().join("README"), readme).unwrap();
        git_sync(&["add", "README"], origin.path());
        git_sync(
            &["-c", "user.name=ci", "-c", "user.email=ci@example.com", "commit", "-q", "-m", readme],
            origin.path(),
        );
        origin
    }

    #[test]
    fn test_lock_key_matches_directory() {
        let workspace = GitWorkspace::new("/tmp/repos");
        assert_eq!(workspace.lock_key("a/b"), workspace.lock_key("a-b"));
        assert_ne!(workspace.lock_key("a"), workspace.lock_key("b"));
        assert_eq!(
            workspace.path_for("a/b"),
            Path::new("/tmp/repos").join(workspace.lock_key("a/b"))
        );
    }

    #[tokio::test]
    async fn test_changed_repository_is_cloned_again() {
        if !git_available() {
            return;
        }

        let repo_a = origin_with("repo-a");
        let repo_b = origin_with("repo-b");
        let base = tempfile::tempdir().unwrap();
        let workspace = GitWorkspace::new(base.path());

        let url_a = repo_a.path().to_string_lossy().to_string();
        let path = workspace.ensure_repo(Some(&url_a), "app").await.unwrap();
        assert_eq!(std::fs::read_to_string(path.join("README")).unwrap(), "repo-a");

        let url_b = repo_b.path().to_string_lossy().to_string();
        let path = workspace.ensure_repo(Some(&url_b), "app").await.unwrap();
        assert_eq!(std::fs::read_to_string(path.join("README")).unwrap(), "repo-b");
        assert_eq!(origin_url(&path).await.unwrap(), url_b);
    }

    #[tokio::test]
    async fn test_clone_failure_is_reported() {
        if !git_available() {
            return;
        }

        let base = tempfile::tempdir().unwrap();
        let workspace = GitWorkspace::new(base.path());
        let missing = base.path().join("does-not-exist");

        let result = workspace
            .ensure_repo(Some(&missing.to_string_lossy()), "app")
            .await;
        assert!(matches!(result, Err(Error::Workspace(_))));
    }
}
