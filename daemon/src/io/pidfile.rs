//! Process identity marker for external status tools.
//!
//! The daemon writes its pid to a well-known path on startup and removes it
//! on clean shutdown, so `kill -0 $(cat .beads/daemon.pid)` style checks can
//! tell whether it is alive.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

pub fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create pid file directory {}", parent.display()))?;
    }
    let pid = std::process::id();
    fs::write(path, format!("{pid}\n"))
        .with_context(|| format!("write pid file {}", path.display()))?;
    debug!(pid, path = %path.display(), "pid file written");
    Ok(())
}

/// Remove the pid file; a missing file is not an error.
pub fn remove_pid_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "pid file removed");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove pid file {}", path.display())),
    }
}
