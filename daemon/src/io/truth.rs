//! Source-of-truth lookup used to corroborate completion.
//!
//! A worker's exit code is not sufficient evidence that its task is done, so
//! the executor also consults an externally-owned record keyed by bead id.
//! Only a narrow read interface is needed here; the record itself belongs to
//! another tool and is not written by the daemon.

use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// What the external record says about a bead's task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TruthRecord {
    pub done: bool,
}

/// Read access to the externally-owned completion record.
pub trait TruthSource {
    fn lookup(&self, id: &str) -> Result<TruthRecord>;
}

/// Truth records stored as one JSON file per bead under a directory.
#[derive(Debug, Clone)]
pub struct FileTruthSource {
    dir: PathBuf,
}

impl FileTruthSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl TruthSource for FileTruthSource {
    /// A missing or unparsable record means "not done"; the external writer
    /// does not share the daemon's atomic-write discipline, so a garbled
    /// read must not abort the execution path.
    fn lookup(&self, id: &str) -> Result<TruthRecord> {
        let path = self.dir.join(format!("{id}.json"));
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(TruthRecord::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read truth record {}", path.display()));
            }
        };
        match serde_json::from_str(raw.trim_start_matches('\u{feff}')) {
            Ok(record) => Ok(record),
            Err(err) => {
                warn!(path = %path.display(), err = %err, "unparsable truth record, treating as not done");
                Ok(TruthRecord::default())
            }
        }
    }
}
