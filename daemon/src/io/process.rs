//! Child-process execution with a hard timeout and bounded output capture.
//!
//! The wait is sliced so both the wall-clock deadline and the cancellation
//! token are honored promptly. Whatever happens, the child never outlives the
//! call: every non-exit path checks liveness and then kills and reaps it.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;

/// Granularity of the wait loop; bounds cancellation latency.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Captured outcome of one child process.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// Exit status; `None` when the child was killed by timeout/cancellation.
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.status.is_some_and(|status| status.success())
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|status| status.code())
    }
}

/// Run a command under a wall-clock timeout, capturing bounded stdout/stderr.
///
/// Output is drained concurrently while the child runs so full pipes cannot
/// deadlock it; bytes beyond `output_limit_bytes` are discarded but counted.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancelToken,
) -> Result<ProcessOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning worker process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, "failed to spawn worker process");
            return Err(err).context("spawn worker process");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            timed_out = true;
            break None;
        }
        if cancel.is_cancelled() {
            cancelled = true;
            break None;
        }
        match child
            .wait_timeout(WAIT_SLICE.min(remaining))
            .context("wait for worker process")?
        {
            Some(status) => break Some(status),
            None => continue,
        }
    };

    let status = match status {
        Some(status) => Some(status),
        None => {
            if timed_out {
                warn!(timeout_secs = timeout.as_secs(), "worker timed out, killing");
            } else {
                debug!("cancellation requested, killing worker");
            }
            reap(&mut child)?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "worker output truncated");
    }

    debug!(exit_code = ?status.and_then(|s| s.code()), timed_out, cancelled, "worker finished");
    Ok(ProcessOutcome {
        status: if timed_out || cancelled { None } else { status },
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
    })
}

/// Kill and reap a child that overstayed its welcome.
///
/// The child may have exited between the last wait and the kill; that race is
/// tolerated by checking liveness first and ignoring an already-gone error.
fn reap(child: &mut std::process::Child) -> Result<Option<ExitStatus>> {
    if let Some(status) = child.try_wait().context("check worker liveness")? {
        return Ok(Some(status));
    }
    if let Err(err) = child.kill() {
        debug!(err = %err, "kill raced with worker exit");
    }
    let status = child.wait().context("reap worker after kill")?;
    Ok(Some(status))
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read worker output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
