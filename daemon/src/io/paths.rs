//! Canonical filesystem layout under `.beads/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// All daemon-owned paths for a project root.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub root: PathBuf,
    pub beads_dir: PathBuf,
    pub items_dir: PathBuf,
    pub truth_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config_path: PathBuf,
    pub pid_path: PathBuf,
}

impl DaemonPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let beads_dir = root.join(".beads");
        Self {
            root,
            items_dir: beads_dir.join("items"),
            truth_dir: beads_dir.join("truth"),
            logs_dir: beads_dir.join("logs"),
            config_path: beads_dir.join("config.toml"),
            pid_path: beads_dir.join("daemon.pid"),
            beads_dir,
        }
    }

    /// Create every daemon-owned directory that does not exist yet.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            &self.beads_dir,
            &self.items_dir,
            &self.truth_dir,
            &self.logs_dir,
        ] {
            create_dir(dir)?;
        }
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}
