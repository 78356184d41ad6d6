use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::validate::{validate_command, Rejection};
use crate::workspace::TaskWorkspace;

/// Resource limits for a single run.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub timeout_ms: u64,
    /// Per-stream capture ceiling; exceeding it kills the process.
    pub max_output_bytes: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_output_bytes: 256 * 1024,
        }
    }
}

/// Why a run counts as failed. Exceeding the output cap kills the process
/// but is reported through `RunReport::truncated`, not as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Refused before spawning; nothing ran.
    ValidationRejected,
    RuntimeNonzeroExit,
    TimeoutKilled,
    SpawnError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ValidationRejected => "validation_rejected",
            FailureKind::RuntimeNonzeroExit => "runtime_nonzero_exit",
            FailureKind::TimeoutKilled => "timeout_killed",
            FailureKind::SpawnError => "spawn_error",
        }
    }
}

/// Outcome of a sandboxed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: i64,
    pub failure: Option<FailureKind>,
    pub truncated: bool,
}

impl RunReport {
    pub(crate) fn rejected(rejection: &Rejection) -> Self {
        Self::validation_failed(rejection.to_string())
    }

    pub(crate) fn validation_failed(message: String) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: message,
            exit_code: None,
            duration_ms: 0,
            failure: Some(FailureKind::ValidationRejected),
            truncated: false,
        }
    }

    pub(crate) fn spawn_error(error: String, duration_ms: i64) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: error,
            exit_code: None,
            duration_ms,
            failure: Some(FailureKind::SpawnError),
            truncated: false,
        }
    }
}

/// Executes validated commands in isolated per-task workspaces.
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    sandbox_root: PathBuf,
}

impl SandboxRunner {
    pub fn new(sandbox_root: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
        }
    }

    pub fn sandbox_root(&self) -> &PathBuf {
        &self.sandbox_root
    }

    /// Validate and run a single command, without a shell, in the task's
    /// workspace with a restricted environment.
    pub async fn run_command(&self, command: &str, task_id: Uuid, limits: &RunLimits) -> RunReport {
        if let Err(rejection) = validate_command(command) {
            warn!(%task_id, command, %rejection, "Command rejected before spawn");
            return RunReport::rejected(&rejection);
        }

        let mut tokens = command.split_whitespace();
        let program = tokens.next().unwrap_or_default().to_string();
        let args: Vec<OsString> = tokens.map(OsString::from).collect();
        self.run_program(&program, &args, task_id, limits).await
    }

    /// Spawn `program` with pre-split arguments. Callers validate what needs
    /// validating; `args` bypass string parsing entirely, so staged file
    /// paths survive whitespace and shell-special characters.
    pub(crate) async fn run_program(
        &self,
        program: &str,
        args: &[OsString],
        task_id: Uuid,
        limits: &RunLimits,
    ) -> RunReport {
        let start = Instant::now();
        let workspace = match TaskWorkspace::create(&self.sandbox_root, task_id).await {
            Ok(ws) => ws,
            Err(e) => return RunReport::spawn_error(e.to_string(), elapsed_ms(start)),
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(workspace.dir())
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("HOME", workspace.dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(%task_id, program, "Spawning sandboxed command");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return RunReport::spawn_error(e.to_string(), elapsed_ms(start)),
        };

        let (trunc_tx, mut trunc_rx) = mpsc::channel::<()>(2);
        let stdout_task = tokio::spawn(read_capped(
            child.stdout.take(),
            limits.max_output_bytes,
            trunc_tx.clone(),
        ));
        let stderr_task = tokio::spawn(read_capped(
            child.stderr.take(),
            limits.max_output_bytes,
            trunc_tx,
        ));

        let mut failure: Option<FailureKind> = None;
        let mut exit_code: Option<i32> = None;
        let mut cap_killed = false;
        let timeout = sleep(Duration::from_millis(limits.timeout_ms));
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => {
                            exit_code = status.code();
                            // A kill we issued for the output cap is not the
                            // child's own failure.
                            if !status.success() && failure.is_none() && !cap_killed {
                                failure = Some(FailureKind::RuntimeNonzeroExit);
                            }
                        }
                        Err(e) => {
                            return RunReport::spawn_error(e.to_string(), elapsed_ms(start));
                        }
                    }
                    break;
                }
                _ = &mut timeout, if failure.is_none() && !cap_killed => {
                    warn!(%task_id, timeout_ms = limits.timeout_ms, "Command timed out, killing");
                    failure = Some(FailureKind::TimeoutKilled);
                    let _ = child.kill().await;
                }
                // A closed channel (`None`) means both readers hit EOF and
                // dropped their senders; only `Some` is a real cap crossing.
                Some(()) = trunc_rx.recv(), if failure.is_none() && !cap_killed => {
                    warn!(%task_id, cap = limits.max_output_bytes, "Output cap exceeded, killing");
                    cap_killed = true;
                    let _ = child.kill().await;
                }
            }
        }

        let (stdout, out_trunc) = stdout_task.await.unwrap_or_default();
        let (stderr, err_trunc) = stderr_task.await.unwrap_or_default();

        RunReport {
            success: failure.is_none(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
            duration_ms: elapsed_ms(start),
            failure,
            truncated: out_trunc || err_trunc,
        }
    }
}

fn elapsed_ms(start: Instant) -> i64 {
    start.elapsed().as_millis() as i64
}

/// Read a stream to EOF, keeping only the first `cap` bytes. Signals on the
/// channel once the cap is crossed and keeps draining so the child never
/// blocks on a full pipe before the kill lands.
async fn read_capped<R: AsyncRead + Unpin>(
    stream: Option<R>,
    cap: usize,
    trunc_tx: mpsc::Sender<()>,
) -> (Vec<u8>, bool) {
    let Some(mut stream) = stream else {
        return (Vec::new(), false);
    };
    let mut buf = [0u8; 8192];
    let mut out = Vec::new();
    let mut truncated = false;
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if truncated {
                    continue;
                }
                if out.len() + n > cap {
                    let keep = cap - out.len();
                    out.extend_from_slice(&buf[..keep]);
                    truncated = true;
                    let _ = trunc_tx.send(()).await;
                } else {
                    out.extend_from_slice(&buf[..n]);
                }
            }
        }
    }
    (out, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(tmp: &tempfile::TempDir) -> SandboxRunner {
        SandboxRunner::new(tmp.path())
    }

    #[tokio::test]
    async fn echo_succeeds_with_captured_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let report = runner(&tmp)
            .run_command("echo hello", Uuid::new_v4(), &RunLimits::default())
            .await;
        assert!(report.success, "stderr: {}", report.stderr);
        assert!(report.stdout.contains("hello"));
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.failure, None);
    }

    #[tokio::test]
    async fn repeated_short_commands_are_never_misreported() {
        // A fast-exiting child closes both output streams at once; EOF on
        // the truncation channel must not be mistaken for a cap crossing.
        let tmp = tempfile::tempdir().unwrap();
        let runner = runner(&tmp);
        let task_id = Uuid::new_v4();
        for i in 0..100 {
            let report = runner
                .run_command("echo hello", task_id, &RunLimits::default())
                .await;
            assert!(
                report.success,
                "run {i}: failure {:?}, exit {:?}, stderr {}",
                report.failure, report.exit_code, report.stderr
            );
            assert_eq!(report.exit_code, Some(0), "run {i}");
            assert!(!report.truncated, "run {i}");
        }
    }

    #[tokio::test]
    async fn exceeding_the_output_cap_truncates_without_failing() {
        let tmp = tempfile::tempdir().unwrap();
        let limits = RunLimits {
            max_output_bytes: 1024,
            ..Default::default()
        };
        let report = runner(&tmp)
            .run_command("head -c 100000 /dev/zero", Uuid::new_v4(), &limits)
            .await;
        assert!(report.success, "failure: {:?}", report.failure);
        assert_eq!(report.failure, None);
        assert!(report.truncated);
        assert!(report.stdout.len() <= 1024);
    }

    #[tokio::test]
    async fn timeout_kills_and_is_distinct_from_nonzero_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let limits = RunLimits {
            timeout_ms: 500,
            ..Default::default()
        };
        let report = runner(&tmp)
            .run_command("sleep 2", Uuid::new_v4(), &limits)
            .await;
        assert!(!report.success);
        assert_eq!(report.failure, Some(FailureKind::TimeoutKilled));
        // Killed around the timeout, long before the sleep would finish.
        assert!(report.duration_ms >= 400 && report.duration_ms < 1500);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_runtime_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let report = runner(&tmp)
            .run_command("cat /nonexistent-taskbeat-file", Uuid::new_v4(), &RunLimits::default())
            .await;
        assert!(!report.success);
        assert_eq!(report.failure, Some(FailureKind::RuntimeNonzeroExit));
        assert_ne!(report.exit_code, Some(0));
    }

    #[tokio::test]
    async fn rejected_commands_never_spawn() {
        let tmp = tempfile::tempdir().unwrap();
        let report = runner(&tmp)
            .run_command("sudo ls", Uuid::new_v4(), &RunLimits::default())
            .await;
        assert!(!report.success);
        assert_eq!(report.failure, Some(FailureKind::ValidationRejected));
        assert_eq!(report.exit_code, None);
    }

    #[tokio::test]
    async fn runs_in_isolated_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let task_id = Uuid::new_v4();
        let report = runner(&tmp)
            .run_command("pwd", task_id, &RunLimits::default())
            .await;
        assert!(report.success);
        assert!(report.stdout.contains(&format!("task-{task_id}")));
    }
}
