//! Daemon configuration stored under `.beads/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::backoff::RestartPolicy;

/// Daemon configuration (TOML).
///
/// This file is intended to be edited by operators and must remain stable.
/// Missing fields default to sensible values; the daemon never requires the
/// file to exist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Seconds between poll cycles.
    pub poll_interval_secs: u64,

    /// Pause between two bead dispatches within one cycle.
    pub item_pause_millis: u64,

    /// Hard wall-clock timeout for one worker process.
    pub bead_timeout_secs: u64,

    /// Dispatches allowed per bead before it is terminally failed.
    pub max_attempts: u32,

    /// Age after which an `in_progress` bead is presumed abandoned.
    pub stuck_after_secs: u64,

    /// Consecutive cycle errors tolerated before a restart pause.
    pub error_threshold: u32,

    /// First restart delay after the error threshold is reached.
    pub restart_base_secs: u64,

    /// Upper bound for the doubling restart delay.
    pub restart_max_secs: u64,

    /// Truncate captured worker stdout/stderr beyond this many bytes.
    pub worker_output_limit_bytes: usize,

    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Command to execute per bead; the bead id and record path are appended.
    pub command: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: vec!["bead-worker".to_string()],
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            item_pause_millis: 500,
            bead_timeout_secs: 30 * 60,
            max_attempts: 3,
            stuck_after_secs: 60 * 60,
            error_threshold: 5,
            restart_base_secs: 30,
            restart_max_secs: 600,
            worker_output_limit_bytes: 100_000,
            worker: WorkerConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be > 0"));
        }
        if self.bead_timeout_secs == 0 {
            return Err(anyhow!("bead_timeout_secs must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.stuck_after_secs == 0 {
            return Err(anyhow!("stuck_after_secs must be > 0"));
        }
        if self.error_threshold == 0 {
            return Err(anyhow!("error_threshold must be > 0"));
        }
        if self.restart_base_secs == 0 {
            return Err(anyhow!("restart_base_secs must be > 0"));
        }
        if self.restart_max_secs < self.restart_base_secs {
            return Err(anyhow!("restart_max_secs must be >= restart_base_secs"));
        }
        if self.worker_output_limit_bytes == 0 {
            return Err(anyhow!("worker_output_limit_bytes must be > 0"));
        }
        if self.worker.command.is_empty() || self.worker.command[0].trim().is_empty() {
            return Err(anyhow!("worker.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn item_pause(&self) -> Duration {
        Duration::from_millis(self.item_pause_millis)
    }

    pub fn bead_timeout(&self) -> Duration {
        Duration::from_secs(self.bead_timeout_secs)
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_after_secs)
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            error_threshold: self.error_threshold,
            base_delay: Duration::from_secs(self.restart_base_secs),
            max_delay: Duration::from_secs(self.restart_max_secs),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DaemonConfig::default()`.
pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    if !path.exists() {
        let cfg = DaemonConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DaemonConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DaemonConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
