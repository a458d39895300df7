//! Top-level daemon loop.
//!
//! Each cycle sweeps stale records, snapshots the eligible beads in priority
//! order, and dispatches them sequentially; the only concurrency is the
//! worker child process itself. Cycle failures feed a consecutive-error
//! counter that escalates to an exponential restart pause instead of
//! terminating the process.

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::core::backoff::RestartState;
use crate::execute::{ExecOutcome, ExecPolicy, execute_bead};
use crate::io::config::DaemonConfig;
use crate::io::paths::DaemonPaths;
use crate::io::pidfile::{remove_pid_file, write_pid_file};
use crate::io::store::BeadStore;
use crate::io::truth::TruthSource;
use crate::io::worker::WorkerInvoker;
use crate::reconcile::reset_stale;

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub stale_reset: usize,
    pub dispatched: usize,
    pub completed: usize,
}

/// Run the daemon until cancelled.
///
/// Creates the storage layout, writes the pid marker, and enters the poll
/// loop. The marker is removed on the way out even when the loop errored.
pub fn run_daemon<W: WorkerInvoker, T: TruthSource>(
    paths: &DaemonPaths,
    config: &DaemonConfig,
    store: &BeadStore,
    worker: &W,
    truth: &T,
    cancel: &CancelToken,
) -> Result<()> {
    paths.ensure_layout()?;
    write_pid_file(&paths.pid_path)?;
    info!(
        pid = std::process::id(),
        root = %paths.root.display(),
        poll_interval_secs = config.poll_interval_secs,
        "daemon started"
    );

    let result = poll_loop(paths, config, store, worker, truth, cancel);

    if let Err(err) = remove_pid_file(&paths.pid_path) {
        warn!(err = %format!("{err:#}"), "failed to remove pid file");
    }
    info!("daemon stopped");
    result
}

fn poll_loop<W: WorkerInvoker, T: TruthSource>(
    paths: &DaemonPaths,
    config: &DaemonConfig,
    store: &BeadStore,
    worker: &W,
    truth: &T,
    cancel: &CancelToken,
) -> Result<()> {
    let restart_policy = config.restart_policy();
    let exec_policy = ExecPolicy {
        workdir: paths.root.clone(),
        logs_dir: paths.logs_dir.clone(),
        timeout: config.bead_timeout(),
        max_attempts: config.max_attempts,
        output_limit_bytes: config.worker_output_limit_bytes,
    };
    let mut restart = RestartState::new(&restart_policy);

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        match run_cycle(store, worker, truth, &exec_policy, config, cancel) {
            Ok(stats) => {
                restart.record_success(&restart_policy);
                if stats.dispatched > 0 || stats.stale_reset > 0 {
                    info!(
                        dispatched = stats.dispatched,
                        completed = stats.completed,
                        stale_reset = stats.stale_reset,
                        "cycle finished"
                    );
                }
            }
            Err(err) => {
                error!(err = %format!("{err:#}"), "daemon cycle failed");
                if let Some(delay) = restart.record_error(&restart_policy) {
                    warn!(
                        delay_secs = delay.as_secs(),
                        "repeated cycle failures, pausing before restart"
                    );
                    if cancel.wait_timeout(delay) {
                        return Ok(());
                    }
                    continue;
                }
            }
        }

        if cancel.wait_timeout(config.poll_interval()) {
            return Ok(());
        }
    }
}

/// One poll cycle: sweep stale records, then dispatch the eligible snapshot.
///
/// The snapshot is not re-sorted mid-cycle; beads appearing while the cycle
/// runs wait for the next one.
pub fn run_cycle<W: WorkerInvoker, T: TruthSource>(
    store: &BeadStore,
    worker: &W,
    truth: &T,
    exec_policy: &ExecPolicy,
    config: &DaemonConfig,
    cancel: &CancelToken,
) -> Result<CycleStats> {
    let stale_reset = reset_stale(store, config.stuck_threshold())?;

    let eligible = store.list_eligible()?;
    debug!(eligible = eligible.len(), stale_reset, "cycle selection");

    let mut stats = CycleStats {
        stale_reset,
        dispatched: 0,
        completed: 0,
    };
    for bead in eligible {
        if cancel.is_cancelled() {
            break;
        }
        let bead_id = bead.id.clone();
        let outcome = execute_bead(store, worker, truth, exec_policy, cancel, bead)?;
        stats.dispatched += 1;
        if outcome == ExecOutcome::Completed {
            stats.completed += 1;
        }
        debug!(bead_id = %bead_id, ?outcome, "bead dispatched");

        if cancel.wait_timeout(config.item_pause()) {
            break;
        }
    }
    Ok(stats)
}
