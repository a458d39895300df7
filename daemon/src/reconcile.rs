//! Stale in-progress recovery.
//!
//! If the daemon crashes mid-execution, the bead it was driving stays
//! `in_progress` on disk with nobody working on it. Each poll cycle starts by
//! sweeping such strays back to `retry` once their last attempt is older than
//! the staleness threshold. This is the sole self-healing path for records
//! stranded by a crash.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, warn};

use crate::bead::BeadStatus;
use crate::io::store::BeadStore;

/// Reset every stale `in_progress` bead back to `retry`.
///
/// Increments `stuck_count` and records a staleness reason on each reset
/// record. Returns how many beads were reset. A failing save on one record
/// is logged and does not stop the sweep.
pub fn reset_stale(store: &BeadStore, threshold: Duration) -> Result<usize> {
    let threshold =
        chrono::Duration::from_std(threshold).context("stuck threshold out of range")?;
    let cutoff = Utc::now() - threshold;

    let mut reset = 0usize;
    for mut bead in store.list_all()? {
        if bead.status != BeadStatus::InProgress {
            continue;
        }
        // A missing last_attempt on an in_progress record means the stamping
        // save never landed; treat it as stale too.
        let stale = match bead.meta.last_attempt {
            Some(at) => at <= cutoff,
            None => true,
        };
        if !stale {
            continue;
        }

        warn!(
            bead_id = %bead.id,
            last_attempt = ?bead.meta.last_attempt,
            "resetting stale in_progress bead to retry"
        );
        bead.status = BeadStatus::Retry;
        bead.meta.stuck_count += 1;
        bead.meta.last_error = Some(format!(
            "reset to retry: stuck in_progress since {}",
            bead.meta
                .last_attempt
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "an unknown time".to_string())
        ));
        match store.save(&mut bead) {
            Ok(()) => reset += 1,
            Err(err) => {
                warn!(bead_id = %bead.id, err = %format!("{err:#}"), "failed to save reset bead");
            }
        }
    }

    if reset > 0 {
        debug!(reset, "stale beads reset");
    }
    Ok(reset)
}
