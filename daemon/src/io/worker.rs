//! Worker invocation seam.
//!
//! The [`WorkerInvoker`] trait decouples bead execution from the actual
//! worker backend. The production backend spawns a configured command as an
//! isolated OS process; tests use scripted invokers that return predetermined
//! exits without spawning anything.
//!
//! The contract is deliberately thin: a worker gets a working directory, the
//! bead id, the record path, and a timeout. The daemon relies only on the
//! exit code and wall-clock completion; there is no other channel.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::io::process::{ProcessOutcome, run_with_timeout};

/// Parameters for one worker invocation.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    /// Working directory for the worker process.
    pub workdir: PathBuf,
    /// Id of the bead being worked on.
    pub bead_id: String,
    /// Path of the bead's record file, handed to the worker as its payload.
    pub payload_path: PathBuf,
    /// Path to write captured worker stdout/stderr.
    pub log_path: PathBuf,
    /// Hard wall-clock timeout for the worker.
    pub timeout: Duration,
    /// Truncate captured output beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// How one worker invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Exit code; `None` when the worker was killed or died on a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl WorkerExit {
    pub fn success(self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Abstraction over worker backends.
pub trait WorkerInvoker {
    fn invoke(&self, request: &WorkerRequest, cancel: &CancelToken) -> Result<WorkerExit>;
}

/// Worker backend that spawns a configured command.
///
/// The bead id and record path are appended to the configured argv.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    command: Vec<String>,
}

impl CommandWorker {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl WorkerInvoker for CommandWorker {
    #[instrument(skip_all, fields(bead_id = %request.bead_id, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &WorkerRequest, cancel: &CancelToken) -> Result<WorkerExit> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("worker command is empty"))?;

        info!(program = %program, workdir = %request.workdir.display(), "starting worker");
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&request.bead_id)
            .arg(&request.payload_path)
            .current_dir(&request.workdir);

        let outcome = run_with_timeout(cmd, request.timeout, request.output_limit_bytes, cancel)
            .with_context(|| format!("run worker for bead {}", request.bead_id))?;

        write_worker_log(&request.log_path, &outcome)?;

        if outcome.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "worker timed out");
        } else {
            debug!(exit_code = ?outcome.exit_code(), "worker exited");
        }

        Ok(WorkerExit {
            exit_code: outcome.exit_code(),
            timed_out: outcome.timed_out,
        })
    }
}

fn write_worker_log(path: &Path, outcome: &ProcessOutcome) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create worker log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&outcome.stdout));
    if outcome.stdout_truncated > 0 {
        buf.push_str(&format!(
            "\n[stdout truncated {} bytes]\n",
            outcome.stdout_truncated
        ));
    }
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&outcome.stderr));
    if outcome.stderr_truncated > 0 {
        buf.push_str(&format!(
            "\n[stderr truncated {} bytes]\n",
            outcome.stderr_truncated
        ));
    }
    if outcome.timed_out {
        buf.push_str("\n[worker timed out]\n");
    }
    if outcome.cancelled {
        buf.push_str("\n[worker cancelled]\n");
    }
    fs::write(path, buf).with_context(|| format!("write worker log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(temp: &tempfile::TempDir, timeout: Duration) -> WorkerRequest {
        WorkerRequest {
            workdir: temp.path().to_path_buf(),
            bead_id: "bd-1".to_string(),
            payload_path: temp.path().join("bd-1.json"),
            log_path: temp.path().join("logs/bd-1.log"),
            timeout,
            output_limit_bytes: 10_000,
        }
    }

    /// The worker receives the bead id and record path as trailing args and
    /// runs in the pinned working directory.
    #[test]
    fn command_worker_passes_contract_arguments() {
        let temp = tempfile::tempdir().expect("tempdir");
        let worker = CommandWorker::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"printf '%s %s' "$0" "$1" > invoked.txt"#.to_string(),
        ]);

        let exit = worker
            .invoke(&request(&temp, Duration::from_secs(5)), &CancelToken::new())
            .expect("invoke");
        assert!(exit.success());

        let invoked = fs::read_to_string(temp.path().join("invoked.txt")).expect("read");
        assert!(invoked.starts_with("bd-1 "));
        assert!(invoked.ends_with("bd-1.json"));
    }

    #[test]
    fn worker_log_captures_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let worker = CommandWorker::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo hello; echo oops >&2; exit 2".to_string(),
        ]);

        let exit = worker
            .invoke(&request(&temp, Duration::from_secs(5)), &CancelToken::new())
            .expect("invoke");
        assert_eq!(exit.exit_code, Some(2));
        assert!(!exit.success());

        let log = fs::read_to_string(temp.path().join("logs/bd-1.log")).expect("read log");
        assert!(log.contains("hello"));
        assert!(log.contains("oops"));
    }

    #[test]
    fn timeout_is_reported_and_logged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let worker = CommandWorker::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "sleep 30".to_string(),
        ]);

        let exit = worker
            .invoke(
                &request(&temp, Duration::from_millis(150)),
                &CancelToken::new(),
            )
            .expect("invoke");
        assert!(exit.timed_out);
        assert_eq!(exit.exit_code, None);

        let log = fs::read_to_string(temp.path().join("logs/bd-1.log")).expect("read log");
        assert!(log.contains("[worker timed out]"));
    }

    #[test]
    fn empty_command_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let worker = CommandWorker::new(Vec::new());
        let err = worker
            .invoke(&request(&temp, Duration::from_secs(1)), &CancelToken::new())
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
