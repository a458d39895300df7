//! Orchestration for executing a single bead.
//!
//! One call = one dispatch attempt: mark the record `in_progress`, run the
//! worker as an isolated process under a hard timeout, then re-read the
//! record and decide completion via [`crate::core::decision`]. Worker
//! failures of every kind are absorbed into the record's state; only storage
//! errors propagate to the caller.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::bead::{Bead, BeadStatus};
use crate::cancel::CancelToken;
use crate::core::decision::{ExitEvidence, Verdict, decide};
use crate::io::store::BeadStore;
use crate::io::truth::TruthSource;
use crate::io::worker::{WorkerInvoker, WorkerRequest};

/// Immutable per-dispatch policy, from configuration.
#[derive(Debug, Clone)]
pub struct ExecPolicy {
    /// Working directory pinned for every worker process.
    pub workdir: PathBuf,
    /// Directory for per-bead worker logs.
    pub logs_dir: PathBuf,
    /// Hard wall-clock timeout per worker.
    pub timeout: Duration,
    /// Dispatches allowed before a bead is terminally failed.
    pub max_attempts: u32,
    /// Truncate captured worker output beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// How one dispatch ended, mirrored in the saved record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Completed,
    Retried,
    TimedOut,
    Failed,
    Blocked,
}

/// Execute one bead end to end.
///
/// Returns an error only for failures of the daemon's own machinery (record
/// saves); everything the worker does wrong becomes a state transition.
#[instrument(skip_all, fields(bead_id = %bead.id))]
pub fn execute_bead<W: WorkerInvoker, T: TruthSource>(
    store: &BeadStore,
    worker: &W,
    truth: &T,
    policy: &ExecPolicy,
    cancel: &CancelToken,
    mut bead: Bead,
) -> Result<ExecOutcome> {
    if bead.id.trim().is_empty() {
        bail!("refuse to execute bead without an id");
    }

    // A permanently broken bead must not retry forever: once its attempts
    // are exhausted before any dispatch, park it for human attention.
    if bead.meta.attempt_count >= policy.max_attempts {
        warn!(
            attempts = bead.meta.attempt_count,
            "attempts exhausted before dispatch, blocking"
        );
        bead.status = BeadStatus::Blocked;
        bead.meta.last_error = Some(format!(
            "blocked: {} attempts used with no completion (max {})",
            bead.meta.attempt_count, policy.max_attempts
        ));
        store.save(&mut bead)?;
        return Ok(ExecOutcome::Blocked);
    }

    bead.status = BeadStatus::InProgress;
    bead.meta.last_attempt = Some(Utc::now());
    bead.meta.attempt_count += 1;
    store.save(&mut bead)?;

    let request = WorkerRequest {
        workdir: policy.workdir.clone(),
        bead_id: bead.id.clone(),
        payload_path: store.record_path(&bead.id),
        log_path: policy.logs_dir.join(format!("{}.log", bead.id)),
        timeout: policy.timeout,
        output_limit_bytes: policy.output_limit_bytes,
    };

    let exit = match worker.invoke(&request, cancel) {
        Ok(exit) => exit,
        Err(err) => {
            // Spawn failures count as a failed attempt, not a daemon error.
            warn!(err = %format!("{err:#}"), "worker invocation failed");
            bead.meta.last_error = Some(format!("worker invocation failed: {err:#}"));
            return settle_incomplete(store, bead, policy.max_attempts);
        }
    };

    if exit.timed_out {
        bead.status = BeadStatus::Retry;
        bead.meta.timeout_count += 1;
        bead.meta.last_error = Some(format!(
            "worker timed out after {}s",
            policy.timeout.as_secs()
        ));
        store.save(&mut bead)?;
        return Ok(ExecOutcome::TimedOut);
    }

    // The worker (or another actor) may have rewritten the record while it
    // ran; what's on disk now is authoritative.
    let mut reloaded = store.load(&bead.id)?.unwrap_or(bead);
    let truth_done = match truth.lookup(&reloaded.id) {
        Ok(record) => record.done,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "truth lookup failed, treating as not done");
            false
        }
    };

    let evidence = ExitEvidence {
        reloaded_status: reloaded.status,
        exit_success: exit.success(),
        truth_done,
    };
    match decide(evidence, reloaded.meta.attempt_count, policy.max_attempts) {
        Verdict::Completed => {
            info!("bead completed");
            reloaded.status = BeadStatus::Completed;
            reloaded.meta.last_error = None;
            store.save(&mut reloaded)?;
            Ok(ExecOutcome::Completed)
        }
        Verdict::Failed => {
            reloaded.meta.last_error = Some(exit_description(exit.exit_code));
            settle_incomplete(store, reloaded, policy.max_attempts)
        }
        Verdict::Retry => {
            debug!(exit_code = ?exit.exit_code, truth_done, "not complete, retrying");
            reloaded.meta.last_error = Some(exit_description(exit.exit_code));
            settle_incomplete(store, reloaded, policy.max_attempts)
        }
    }
}

/// Park a bead that did not complete: `failed` once attempts are exhausted,
/// `retry` otherwise.
fn settle_incomplete(
    store: &BeadStore,
    mut bead: Bead,
    max_attempts: u32,
) -> Result<ExecOutcome> {
    if bead.meta.attempt_count >= max_attempts {
        warn!(bead_id = %bead.id, attempts = bead.meta.attempt_count, "retries exhausted, failing");
        bead.status = BeadStatus::Failed;
        store.save(&mut bead)?;
        return Ok(ExecOutcome::Failed);
    }
    bead.status = BeadStatus::Retry;
    store.save(&mut bead)?;
    Ok(ExecOutcome::Retried)
}

fn exit_description(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(0) => "worker exited 0 but completion was not confirmed".to_string(),
        Some(code) => format!("worker exited with code {code}"),
        None => "worker died without an exit code".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bead::BeadStatus;
    use crate::test_support::{
        ScriptedInvocation, ScriptedTruth, ScriptedWorker, TestStore, exit_with, pending_bead,
    };

    fn policy(temp: &TestStore, max_attempts: u32) -> ExecPolicy {
        ExecPolicy {
            workdir: temp.root().to_path_buf(),
            logs_dir: temp.root().join("logs"),
            timeout: Duration::from_secs(5),
            max_attempts,
            output_limit_bytes: 10_000,
        }
    }

    /// Worker exits 0 and the truth record confirms: completed.
    #[test]
    fn clean_exit_with_truth_completes() {
        let ts = TestStore::new();
        let bead = ts.seed(pending_bead("bd-1", 1));
        let worker = ScriptedWorker::new(vec![ScriptedInvocation::exit(exit_with(0))]);
        let truth = ScriptedTruth::done_for(["bd-1"]);

        let outcome = execute_bead(
            &ts.store,
            &worker,
            &truth,
            &policy(&ts, 3),
            &CancelToken::new(),
            bead,
        )
        .expect("execute");

        assert_eq!(outcome, ExecOutcome::Completed);
        let saved = ts.store.load("bd-1").expect("load").expect("present");
        assert_eq!(saved.status, BeadStatus::Completed);
        assert_eq!(saved.meta.attempt_count, 1);
        assert!(saved.meta.last_error.is_none());
    }

    /// Worker exits 0 but the truth record says not done: retried.
    #[test]
    fn clean_exit_without_truth_confirmation_retries() {
        let ts = TestStore::new();
        let bead = ts.seed(pending_bead("bd-1", 1));
        let worker = ScriptedWorker::new(vec![ScriptedInvocation::exit(exit_with(0))]);
        let truth = ScriptedTruth::never_done();

        let outcome = execute_bead(
            &ts.store,
            &worker,
            &truth,
            &policy(&ts, 3),
            &CancelToken::new(),
            bead,
        )
        .expect("execute");

        assert_eq!(outcome, ExecOutcome::Retried);
        let saved = ts.store.load("bd-1").expect("load").expect("present");
        assert_eq!(saved.status, BeadStatus::Retry);
        assert!(
            saved
                .meta
                .last_error
                .as_deref()
                .expect("last_error")
                .contains("not confirmed")
        );
    }

    /// Worker exits non-zero but flipped its own record to completed while
    /// running: the record wins.
    #[test]
    fn record_flipped_to_completed_beats_bad_exit() {
        let ts = TestStore::new();
        let bead = ts.seed(pending_bead("bd-1", 1));
        let worker = ScriptedWorker::new(vec![
            ScriptedInvocation::exit(exit_with(1)).rewriting_status(BeadStatus::Completed),
        ]);
        let truth = ScriptedTruth::never_done();

        let outcome = execute_bead(
            &ts.store,
            &worker,
            &truth,
            &policy(&ts, 3),
            &CancelToken::new(),
            bead,
        )
        .expect("execute");

        assert_eq!(outcome, ExecOutcome::Completed);
        let saved = ts.store.load("bd-1").expect("load").expect("present");
        assert_eq!(saved.status, BeadStatus::Completed);
    }

    /// A timeout is retryable and bumps the timeout counter.
    #[test]
    fn timeout_retries_and_counts() {
        let ts = TestStore::new();
        let bead = ts.seed(pending_bead("bd-1", 1));
        let worker = ScriptedWorker::new(vec![ScriptedInvocation::timed_out()]);
        let truth = ScriptedTruth::never_done();

        let outcome = execute_bead(
            &ts.store,
            &worker,
            &truth,
            &policy(&ts, 3),
            &CancelToken::new(),
            bead,
        )
        .expect("execute");

        assert_eq!(outcome, ExecOutcome::TimedOut);
        let saved = ts.store.load("bd-1").expect("load").expect("present");
        assert_eq!(saved.status, BeadStatus::Retry);
        assert_eq!(saved.meta.timeout_count, 1);
        assert_eq!(saved.meta.attempt_count, 1);
        assert!(saved.meta.last_attempt.is_some());
    }

    /// Failure lands exactly when attempt_count reaches max_attempts.
    #[test]
    fn repeated_failures_fail_exactly_at_max_attempts() {
        let ts = TestStore::new();
        ts.seed(pending_bead("bd-1", 1));
        let truth = ScriptedTruth::never_done();
        let policy = policy(&ts, 2);

        let worker = ScriptedWorker::new(vec![ScriptedInvocation::exit(exit_with(1))]);
        let bead = ts.store.load("bd-1").expect("load").expect("present");
        let outcome = execute_bead(
            &ts.store,
            &worker,
            &truth,
            &policy,
            &CancelToken::new(),
            bead,
        )
        .expect("execute");
        assert_eq!(outcome, ExecOutcome::Retried, "first failure retries");

        let worker = ScriptedWorker::new(vec![ScriptedInvocation::exit(exit_with(1))]);
        let bead = ts.store.load("bd-1").expect("load").expect("present");
        let outcome = execute_bead(
            &ts.store,
            &worker,
            &truth,
            &policy,
            &CancelToken::new(),
            bead,
        )
        .expect("execute");
        assert_eq!(outcome, ExecOutcome::Failed, "second failure is terminal");

        let saved = ts.store.load("bd-1").expect("load").expect("present");
        assert_eq!(saved.status, BeadStatus::Failed);
        assert_eq!(saved.meta.attempt_count, 2);
    }

    /// A bead arriving with exhausted attempts blocks without any dispatch.
    #[test]
    fn exhausted_bead_blocks_without_invoking_worker() {
        let ts = TestStore::new();
        let mut bead = pending_bead("bd-1", 1);
        bead.meta.attempt_count = 3;
        let bead = ts.seed(bead);
        let worker = ScriptedWorker::new(Vec::new());
        let truth = ScriptedTruth::never_done();

        let outcome = execute_bead(
            &ts.store,
            &worker,
            &truth,
            &policy(&ts, 3),
            &CancelToken::new(),
            bead,
        )
        .expect("execute");

        assert_eq!(outcome, ExecOutcome::Blocked);
        assert!(worker.invoked_ids().is_empty(), "worker never spawned");
        let saved = ts.store.load("bd-1").expect("load").expect("present");
        assert_eq!(saved.status, BeadStatus::Blocked);
        assert_eq!(saved.meta.attempt_count, 3, "no extra attempt recorded");
    }

    /// Spawn failures become a retry on the record, not an error.
    #[test]
    fn invocation_error_is_contained_as_retry() {
        let ts = TestStore::new();
        let bead = ts.seed(pending_bead("bd-1", 1));
        let worker = ScriptedWorker::failing("no such worker binary");
        let truth = ScriptedTruth::never_done();

        let outcome = execute_bead(
            &ts.store,
            &worker,
            &truth,
            &policy(&ts, 3),
            &CancelToken::new(),
            bead,
        )
        .expect("execute");

        assert_eq!(outcome, ExecOutcome::Retried);
        let saved = ts.store.load("bd-1").expect("load").expect("present");
        assert_eq!(saved.status, BeadStatus::Retry);
        assert!(
            saved
                .meta
                .last_error
                .as_deref()
                .expect("last_error")
                .contains("invocation failed")
        );
    }

    #[test]
    fn empty_id_is_rejected() {
        let ts = TestStore::new();
        let worker = ScriptedWorker::new(Vec::new());
        let truth = ScriptedTruth::never_done();

        let err = execute_bead(
            &ts.store,
            &worker,
            &truth,
            &policy(&ts, 3),
            &CancelToken::new(),
            crate::bead::Bead::new(""),
        )
        .unwrap_err();
        assert!(err.to_string().contains("without an id"));
    }
}
