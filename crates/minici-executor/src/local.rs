//! Local process executor.
//!
//! Each stage runs as `sh -c <command>` in its own process group so that a
//! timeout can take down everything the shell started, not just the shell.

use async_trait::async_trait;
use minici_core::executor::{Executor, TIMEOUT_OUTPUT};
use minici_core::pipeline::{Stage, StageResult, StageStatus};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::{Pid, pipe2};
use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe::Receiver;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Exit code reported when the stage process could not be started.
const SPAWN_FAILURE_CODE: i32 = 127;

/// How long output is still read after the stage exits. Processes that left
/// the stage's process group can hold the pipe open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Output collected so far, shared with the reader task.
type OutputBuffer = Arc<Mutex<Vec<u8>>>;

/// Output pipe for one stage. Both ends are close-on-exec so processes
/// spawned concurrently never inherit them; the child gets its copies
/// through dup2 onto stdout and stderr.
fn output_pipe() -> std::io::Result<(OwnedFd, OwnedFd)> {
    Ok(pipe2(OFlag::O_CLOEXEC)?)
}

/// Runs stages as child processes of the orchestrator.
pub struct LocalExecutor {
    shell: PathBuf,
    inherit_env: bool,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalExecutor {
    /// Create an executor using `/bin/sh` and the orchestrator's environment.
    pub fn new() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            inherit_env: true,
        }
    }

    /// Use a different POSIX shell to interpret stage commands.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Start stages from an empty environment instead of inheriting ours.
    pub fn isolated_env(mut self) -> Self {
        self.inherit_env = false;
        self
    }

    fn build_command(
        &self,
        stage: &Stage,
        workdir: &Path,
        params: &HashMap<String, String>,
        output: OwnedFd,
        errors: OwnedFd,
    ) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&stage.command)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(output)
            .stderr(errors)
            .process_group(0)
            .kill_on_drop(true);

        if !self.inherit_env {
            cmd.env_clear();
        }
        // Params are applied last so they win over the stage's own env.
        cmd.envs(&stage.env);
        cmd.envs(params);
        cmd
    }

    /// Spawn the stage with stdout and stderr sharing one pipe.
    fn spawn(
        &self,
        stage: &Stage,
        workdir: &Path,
        params: &HashMap<String, String>,
    ) -> std::io::Result<(Child, JoinHandle<()>, OutputBuffer)> {
        let (read_end, write_end) = output_pipe()?;
        let write_end_dup = write_end.try_clone()?;

        // The command owns our copies of the write end; it must be dropped
        // right after spawning or the reader never sees EOF.
        let child = self
            .build_command(stage, workdir, params, write_end, write_end_dup)
            .spawn()?;

        let receiver = Receiver::from_owned_fd(read_end)?;
        let output = OutputBuffer::default();
        let capture = tokio::spawn(read_into(receiver, output.clone()));
        Ok((child, capture, output))
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn execute(
        &self,
        stage: &Stage,
        workdir: &Path,
        params: &HashMap<String, String>,
        timeout: Duration,
    ) -> StageResult {
        let started = Instant::now();

        let (mut child, mut capture, output) = match self.spawn(stage, workdir, params) {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(stage = %stage.name, workdir = %workdir.display(), error = %e, "Failed to spawn stage");
                return StageResult {
                    name: stage.name.clone(),
                    status: StageStatus::Failed,
                    duration_seconds: started.elapsed().as_secs_f64(),
                    output: format!("failed to start '{}': {}", stage.command, e),
                    exit_code: Some(SPAWN_FAILURE_CODE),
                };
            }
        };

        // Read before waiting: once reaped, the child no longer reports its id.
        let pid = child.id();
        info!(stage = %stage.name, pid = ?pid, timeout_secs = timeout.as_secs(), "Stage started");

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        let duration = started.elapsed();

        let status = match waited {
            Ok(status) => status,
            Err(_) => {
                kill_group(pid);
                if let Err(e) = child.kill().await {
                    debug!(stage = %stage.name, error = %e, "Stage already exited");
                }
                capture.abort();

                warn!(stage = %stage.name, timeout_secs = timeout.as_secs(), "Stage timed out");
                return StageResult {
                    name: stage.name.clone(),
                    status: StageStatus::TimedOut,
                    duration_seconds: duration.as_secs_f64(),
                    output: TIMEOUT_OUTPUT.to_string(),
                    exit_code: None,
                };
            }
        };

        // Background jobs left behind by the shell keep the pipe open.
        kill_group(pid);
        if tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut capture).await.is_err() {
            debug!(stage = %stage.name, "Output still open after exit, detaching");
            capture.abort();
        }
        let mut text = String::from_utf8_lossy(&take_output(&output)).into_owned();

        match status {
            Ok(status) => {
                let exit_code = exit_code(status);
                let status = if exit_code == 0 {
                    StageStatus::Success
                } else {
                    StageStatus::Failed
                };
                info!(stage = %stage.name, %status, exit_code, elapsed_ms = duration.as_millis() as u64, "Stage finished");

                StageResult {
                    name: stage.name.clone(),
                    status,
                    duration_seconds: duration.as_secs_f64(),
                    output: text,
                    exit_code: Some(exit_code),
                }
            }
            Err(e) => {
                warn!(stage = %stage.name, error = %e, "Failed to wait for stage");
                text.push_str(&format!("\nfailed to wait for stage: {}", e));
                StageResult {
                    name: stage.name.clone(),
                    status: StageStatus::Failed,
                    duration_seconds: duration.as_secs_f64(),
                    output: text,
                    exit_code: Some(-1),
                }
            }
        }
    }
}

/// Append everything read from `receiver` to `output` until EOF.
async fn read_into(mut receiver: Receiver, output: OutputBuffer) {
    let mut chunk = [0u8; 8192];
    loop {
        match receiver.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                output
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]);
            }
            Err(e) => {
                debug!(error = %e, "Stage output stream closed with error");
                break;
            }
        }
    }
}

fn take_output(output: &OutputBuffer) -> Vec<u8> {
    std::mem::take(&mut *output.lock().unwrap_or_else(PoisonError::into_inner))
}

/// SIGKILL the process group led by `pid`. A group that is already gone is fine.
fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!(pid, error = %e, "Failed to signal process group"),
    }
}

/// Exit code of a finished process; signal deaths map to `128 + signal`.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(command: &str, timeout: Duration) -> StageResult {
        let dir = tempfile::tempdir().unwrap();
        LocalExecutor::new()
            .execute(&Stage::new("test", command), dir.path(), &HashMap::new(), timeout)
            .await
    }

    #[tokio::test]
    async fn test_successful_stage() {
        let result = run("echo hello", Duration::from_secs(10)).await;
        assert_eq!(result.status, StageStatus::Success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.output, "hello\n");
        assert_eq!(result.name, "test");
    }

    #[tokio::test]
    async fn test_failing_stage_records_exit_code() {
        let result = run("echo broken; exit 3", Duration::from_secs(10)).await;
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.output, "broken\n");
    }

    #[tokio::test]
    async fn test_stdout_and_stderr_are_merged() {
        let result = run("echo out; echo err 1>&2; echo again", Duration::from_secs(10)).await;
        assert_eq!(result.output, "out\nerr\nagain\n");
    }

    #[tokio::test]
    async fn test_params_override_stage_env() {
        let dir = tempfile::tempdir().unwrap();
        let stage = Stage::new("env", "echo \"$FOO-$BAR\"")
            .with_env("FOO", "stage")
            .with_env("BAR", "stage");
        let params = HashMap::from([("FOO".to_string(), "param".to_string())]);

        let result = LocalExecutor::new()
            .execute(&stage, dir.path(), &params, Duration::from_secs(10))
            .await;
        assert_eq!(result.output, "param-stage\n");
    }

    #[tokio::test]
    async fn test_isolated_env_drops_inherited_variables() {
        let dir = tempfile::tempdir().unwrap();
        let stage = Stage::new("env", "echo \"[$HOME]\"");

        let result = LocalExecutor::new()
            .isolated_env()
            .execute(&stage, dir.path(), &HashMap::new(), Duration::from_secs(10))
            .await;
        assert_eq!(result.output, "[]\n");
    }

    #[tokio::test]
    async fn test_runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let result = LocalExecutor::new()
            .execute(
                &Stage::new("touch", "touch marker"),
                dir.path(),
                &HashMap::new(),
                Duration::from_secs(10),
            )
            .await;

        assert!(result.is_success());
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_timeout_kills_stage() {
        let started = Instant::now();
        let result = run("sleep 30", Duration::from_millis(300)).await;

        assert_eq!(result.status, StageStatus::TimedOut);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.output, TIMEOUT_OUTPUT);
        assert!(result.duration_seconds >= 0.3);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let started = Instant::now();
        let result = run("sleep 30 & sleep 30; wait", Duration::from_millis(300)).await;

        assert_eq!(result.status, StageStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_leftover_background_job_does_not_hold_stage() {
        let started = Instant::now();
        let result = run("sleep 30 & echo started", Duration::from_secs(20)).await;

        assert_eq!(result.status, StageStatus::Success);
        assert_eq!(result.output, "started\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_detached_child_does_not_turn_exit_into_timeout() {
        let has_setsid = std::process::Command::new("setsid")
            .arg("true")
            .status()
            .is_ok_and(|s| s.success());
        if !has_setsid {
            return;
        }

        let started = Instant::now();
        let result = run("setsid sleep 10 & echo hi; exit 0", Duration::from_secs(5)).await;

        assert_eq!(result.status, StageStatus::Success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.output, "hi\n");
        assert!(result.duration_seconds < 5.0);
        assert!(started.elapsed() < OUTPUT_DRAIN_GRACE + Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_detached_child_keeps_exit_code() {
        let has_setsid = std::process::Command::new("setsid")
            .arg("true")
            .status()
            .is_ok_and(|s| s.success());
        if !has_setsid {
            return;
        }

        let result = run("setsid sleep 10 & echo bad; exit 4", Duration::from_secs(5)).await;
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.exit_code, Some(4));
        assert_eq!(result.output, "bad\n");
    }

    #[test]
    fn test_output_pipe_is_close_on_exec() {
        use nix::fcntl::{FcntlArg, FdFlag, fcntl};
        use std::os::fd::AsRawFd;

        let (read_end, write_end) = output_pipe().unwrap();
        for fd in [&read_end, &write_end] {
            let flags = FdFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFD).unwrap());
            assert!(flags.contains(FdFlag::FD_CLOEXEC));
        }
    }

    #[tokio::test]
    async fn test_concurrent_stages_do_not_hold_each_others_output() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(LocalExecutor::new());

        let slow = {
            let executor = executor.clone();
            let path = dir.path().to_path_buf();
            tokio::spawn(async move {
                executor
                    .execute(&Stage::new("slow", "sleep 3"), &path, &HashMap::new(), Duration::from_secs(10))
                    .await
            })
        };

        let started = Instant::now();
        for n in 0..20 {
            let result = executor
                .execute(
                    &Stage::new("quick", format!("echo {}", n)),
                    dir.path(),
                    &HashMap::new(),
                    Duration::from_secs(10),
                )
                .await;
            assert_eq!(result.output, format!("{}\n", n));
        }
        assert!(started.elapsed() < Duration::from_millis(2500));
        assert!(slow.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_is_kept() {
        let result = run("printf '\\377ok'", Duration::from_secs(10)).await;
        assert!(result.is_success());
        assert!(result.output.ends_with("ok"));
    }

    #[tokio::test]
    async fn test_missing_workdir_fails_stage() {
        let result = LocalExecutor::new()
            .execute(
                &Stage::new("nowhere", "true"),
                Path::new("/nonexistent/minici/workdir"),
                &HashMap::new(),
                Duration::from_secs(10),
            )
            .await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.exit_code, Some(SPAWN_FAILURE_CODE));
    }
}
