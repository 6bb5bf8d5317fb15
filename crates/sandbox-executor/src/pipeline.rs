//! The seven-step execution pipeline (spec.md §4.5 step 5):
//! write code, build a wrapper, run it under isolation, capture output,
//! parse the sentinel, scan artifacts, and hand back a result for callback.
//!
//! The wait loop is grounded on the teacher's `wait_with_cancellation` in
//! `runner/oci/runner.rs`: poll `try_wait` on an interval, compare elapsed
//! time against the deadline, and kill on timeout rather than trusting the
//! child to honor it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;

use sandbox_core::model::{truncate_stream, ArtifactMetadata, ExecutionMetrics, ExecutionStatus};

use crate::artifacts::scan_workspace;
use crate::isolation::build_isolated_command;
use crate::sentinel::{build_wrapper, parse_sentinel};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct PipelineOutcome {
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub artifacts: Vec<ArtifactMetadata>,
    pub metrics: ExecutionMetrics,
    pub return_value: Option<Value>,
}

pub struct PipelineRequest<'a> {
    pub workspace: &'a Path,
    pub language: &'a str,
    pub code: &'a str,
    pub event: Value,
    pub timeout: Duration,
    pub disable_bwrap: bool,
    pub env_vars: &'a std::collections::HashMap<String, String>,
}

pub async fn run(req: PipelineRequest<'_>) -> PipelineOutcome {
    let wrapper = match build_wrapper(req.language, req.code) {
        Ok(w) => w,
        Err(e) => {
            return PipelineOutcome {
                status: ExecutionStatus::Failed,
                exit_code: None,
                error_message: Some(e),
                stdout: String::new(),
                stderr: String::new(),
                artifacts: Vec::new(),
                metrics: ExecutionMetrics::default(),
                return_value: None,
            }
        }
    };

    if let Err(e) = write_workspace_files(req.workspace, &wrapper, req.code) {
        return PipelineOutcome {
            status: ExecutionStatus::Crashed,
            exit_code: None,
            error_message: Some(format!("failed to prepare workspace: {e}")),
            stdout: String::new(),
            stderr: String::new(),
            artifacts: Vec::new(),
            metrics: ExecutionMetrics::default(),
            return_value: None,
        };
    }

    let mut command = build_isolated_command(req.workspace, &wrapper.argv, req.disable_bwrap);
    command
        .envs(req.env_vars)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = match command.spawn() {
        Ok(c) => c,
        Err(e) => {
            return PipelineOutcome {
                status: ExecutionStatus::Crashed,
                exit_code: None,
                error_message: Some(format!("failed to spawn execution: {e}")),
                stdout: String::new(),
                stderr: String::new(),
                artifacts: Vec::new(),
                metrics: ExecutionMetrics::default(),
                return_value: None,
            }
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        let payload = serde_json::to_vec(&req.event).unwrap_or_default();
        let _ = stdin.write_all(&payload).await;
        drop(stdin);
    }

    let stdout_handle = child.stdout.take().map(|s| tokio::spawn(read_all(s)));
    let stderr_handle = child.stderr.take().map(|s| tokio::spawn(read_all(s)));

    let timed_out = wait_with_timeout(&mut child, req.timeout).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let stdout_raw = match stdout_handle {
        Some(h) => h.await.unwrap_or_default(),
        None => String::new(),
    };
    let stderr_raw = match stderr_handle {
        Some(h) => h.await.unwrap_or_default(),
        None => String::new(),
    };
    let stdout_raw = truncate_stream(&stdout_raw);
    let stderr_raw = truncate_stream(&stderr_raw);

    let artifacts = scan_workspace(req.workspace);
    let metrics = ExecutionMetrics {
        duration_ms,
        cpu_time_ms: None,
        peak_memory_mb: None,
    };

    if timed_out {
        return PipelineOutcome {
            status: ExecutionStatus::Timeout,
            exit_code: None,
            error_message: Some(format!("execution exceeded {}s timeout", req.timeout.as_secs())),
            stdout: stdout_raw,
            stderr: stderr_raw,
            artifacts,
            metrics,
            return_value: None,
        };
    }

    let exit_status = child.wait().await.ok();
    let exit_code = exit_status.and_then(|s| s.code());
    let (stdout, return_value) = parse_sentinel(&stdout_raw);

    let status = match exit_code {
        Some(0) => ExecutionStatus::Completed,
        Some(_) => ExecutionStatus::Failed,
        // No exit code means the process was killed by a signal.
        None => ExecutionStatus::Crashed,
    };

    let error_message = match status {
        ExecutionStatus::Failed => Some(format!("process exited with code {exit_code:?}")),
        ExecutionStatus::Crashed => Some("process terminated by signal".to_string()),
        _ => None,
    };

    PipelineOutcome {
        status,
        exit_code,
        error_message,
        stdout,
        stderr: stderr_raw,
        artifacts,
        metrics,
        return_value,
    }
}

fn write_workspace_files(
    workspace: &Path,
    wrapper: &crate::sentinel::Wrapper,
    code: &str,
) -> std::io::Result<()> {
    std::fs::create_dir_all(workspace)?;
    std::fs::write(workspace.join(wrapper.user_file), code)?;
    if !wrapper.wrapper_source.is_empty() && wrapper.wrapper_file != wrapper.user_file {
        std::fs::write(workspace.join(wrapper.wrapper_file), &wrapper.wrapper_source)?;
    }
    Ok(())
}

async fn read_all(mut pipe: impl tokio::io::AsyncRead + Unpin) -> String {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).to_string()
}

/// Polls `try_wait` until the child exits or `timeout` elapses, killing it
/// in the latter case. Returns true if the timeout was hit.
async fn wait_with_timeout(child: &mut Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return false,
            Ok(None) => {}
            Err(_) => return false,
        }
        if Instant::now() >= deadline {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Resolves the on-disk workspace path for a session, matching the layout
/// the scheduler mounts at `/workspace` inside the container.
pub fn workspace_path(root: &str) -> PathBuf {
    PathBuf::from(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn shell_script_completes_and_reports_exit_code() {
        let dir = TempDir::new().unwrap();
        let env_vars = HashMap::new();

        let outcome = run(PipelineRequest {
            workspace: dir.path(),
            language: "shell",
            code: "echo hello",
            event: serde_json::json!({}),
            timeout: Duration::from_secs(5),
            disable_bwrap: true,
            env_vars: &env_vars,
        })
        .await;

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn unsupported_language_fails_without_spawning() {
        let dir = TempDir::new().unwrap();
        let env_vars = HashMap::new();

        let outcome = run(PipelineRequest {
            workspace: dir.path(),
            language: "ruby",
            code: "puts 1",
            event: serde_json::json!({}),
            timeout: Duration::from_secs(5),
            disable_bwrap: true,
            env_vars: &env_vars,
        })
        .await;

        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(outcome.error_message.is_some());
    }

    #[tokio::test]
    async fn slow_script_is_killed_on_timeout() {
        let dir = TempDir::new().unwrap();
        let env_vars = HashMap::new();

        let outcome = run(PipelineRequest {
            workspace: dir.path(),
            language: "shell",
            code: "sleep 30",
            event: serde_json::json!({}),
            timeout: Duration::from_millis(200),
            disable_bwrap: true,
            env_vars: &env_vars,
        })
        .await;

        assert_eq!(outcome.status, ExecutionStatus::Timeout);
    }
}
