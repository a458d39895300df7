//! Bead record storage: one JSON file per bead, written crash-safely.
//!
//! Saves go through a temp-file + backup + atomic-rename sequence so a crash
//! at any point leaves either the fully-previous or fully-new record on disk,
//! never a truncated one. Reads tolerate a UTF-8 byte-order marker and fill
//! missing fields via the defaulting deserializer in [`crate::bead`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, warn};

use crate::bead::Bead;

/// File-backed store for bead records.
///
/// This is the only component that touches record files; everything above it
/// (scheduler, executor, reconciler) goes through this interface, so the
/// storage layout could be swapped without touching them.
#[derive(Debug, Clone)]
pub struct BeadStore {
    items_dir: PathBuf,
}

impl BeadStore {
    pub fn new(items_dir: impl Into<PathBuf>) -> Self {
        Self {
            items_dir: items_dir.into(),
        }
    }

    /// Path of the record file for `id`.
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.items_dir.join(format!("{id}.json"))
    }

    /// Read one record. Missing file is `Ok(None)`.
    pub fn load(&self, id: &str) -> Result<Option<Bead>> {
        let path = self.record_path(id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("read bead record {}", path.display()));
            }
        };
        let bead =
            parse_record(&raw).with_context(|| format!("parse bead record {}", path.display()))?;
        Ok(Some(bead))
    }

    /// Persist one record crash-safely, stamping its timestamps.
    ///
    /// `created_at` is set on the first save and never changed afterwards;
    /// `updated_at` is refreshed and kept non-decreasing. Fails loudly when
    /// the record has no id.
    pub fn save(&self, bead: &mut Bead) -> Result<()> {
        if bead.id.trim().is_empty() {
            bail!("refuse to save bead record without an id");
        }
        fs::create_dir_all(&self.items_dir)
            .with_context(|| format!("create items directory {}", self.items_dir.display()))?;

        let now = Utc::now();
        if bead.created_at.is_none() {
            bead.created_at = Some(now);
        }
        bead.updated_at = Some(match bead.updated_at {
            Some(prev) if prev > now => prev,
            _ => now,
        });
        bead.meta.last_updated = Some(now);

        let target = self.record_path(&bead.id);
        let tmp = self.items_dir.join(format!("{}.json.tmp", bead.id));
        let backup = self.items_dir.join(format!("{}.json.bak", bead.id));

        let mut buf = serde_json::to_string_pretty(bead).context("serialize bead record")?;
        buf.push('\n');

        if let Err(err) = replace_record(&target, &tmp, &backup, &buf) {
            // Roll back: put the previous record back in place and drop the
            // half-written temp file before reporting the failure.
            if backup.is_file() {
                let _ = fs::copy(&backup, &target);
            }
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }

        debug!(bead_id = %bead.id, status = bead.status.as_str(), "bead record saved");
        Ok(())
    }

    /// Read every record in the store.
    ///
    /// Records that fail to read or parse are logged and skipped; one bad
    /// file must never abort the scan.
    pub fn list_all(&self) -> Result<Vec<Bead>> {
        let entries = match fs::read_dir(&self.items_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("scan items directory {}", self.items_dir.display()));
            }
        };

        let mut beads = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("scan items directory {}", self.items_dir.display()))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                // Skip leftovers from interrupted saves (.tmp, .bak).
                continue;
            }
            match read_record(&path) {
                Ok(bead) => beads.push(bead),
                Err(err) => {
                    warn!(path = %path.display(), err = %format!("{err:#}"), "skipping corrupt bead record");
                }
            }
        }
        Ok(beads)
    }

    /// Every `pending` or `retry` record, sorted by ascending priority with
    /// ties broken by id for determinism.
    pub fn list_eligible(&self) -> Result<Vec<Bead>> {
        let mut beads: Vec<Bead> = self
            .list_all()?
            .into_iter()
            .filter(|bead| bead.status.is_eligible())
            .collect();
        beads.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(beads)
    }
}

/// Write `contents` over `target` via temp file, keeping a backup of the
/// previous version until the rename has succeeded.
fn replace_record(target: &Path, tmp: &Path, backup: &Path, contents: &str) -> Result<()> {
    fs::write(tmp, contents).with_context(|| format!("write temp record {}", tmp.display()))?;
    if target.exists() {
        fs::copy(target, backup)
            .with_context(|| format!("back up record {}", target.display()))?;
    }
    fs::rename(tmp, target).with_context(|| format!("replace record {}", target.display()))?;
    let _ = fs::remove_file(backup);
    Ok(())
}

fn read_record(path: &Path) -> Result<Bead> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read bead record {}", path.display()))?;
    parse_record(&raw).with_context(|| format!("parse bead record {}", path.display()))
}

fn parse_record(raw: &str) -> Result<Bead> {
    // Records written by other tools may carry a UTF-8 BOM.
    let trimmed = raw.trim_start_matches('\u{feff}');
    let bead: Bead = serde_json::from_str(trimmed)?;
    Ok(bead)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bead::{BeadStatus, LOWEST_PRIORITY};

    fn store_in(temp: &tempfile::TempDir) -> BeadStore {
        BeadStore::new(temp.path().join("items"))
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);

        let mut bead = Bead::new("bd-1");
        bead.title = "do the thing".to_string();
        bead.priority = 4;
        store.save(&mut bead).expect("save");

        let loaded = store.load("bd-1").expect("load").expect("present");
        assert_eq!(loaded, bead);
        assert!(loaded.created_at.is_some());
    }

    #[test]
    fn load_missing_returns_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        assert!(store.load("nope").expect("load").is_none());
    }

    #[test]
    fn save_without_id_fails_loudly() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        let err = store.save(&mut Bead::new("  ")).unwrap_err();
        assert!(err.to_string().contains("without an id"));
    }

    #[test]
    fn save_leaves_no_temp_or_backup_residue() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);

        let mut bead = Bead::new("bd-1");
        store.save(&mut bead).expect("first save");
        bead.status = BeadStatus::Retry;
        store.save(&mut bead).expect("second save");

        let items = temp.path().join("items");
        assert!(items.join("bd-1.json").is_file());
        assert!(!items.join("bd-1.json.tmp").exists());
        assert!(!items.join("bd-1.json.bak").exists());
    }

    #[test]
    fn created_at_is_immutable_and_updated_at_never_decreases() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);

        let mut bead = Bead::new("bd-1");
        store.save(&mut bead).expect("save");
        let created = bead.created_at;
        let first_updated = bead.updated_at.expect("updated_at");

        store.save(&mut bead).expect("save again");
        assert_eq!(bead.created_at, created);
        assert!(bead.updated_at.expect("updated_at") >= first_updated);
    }

    #[test]
    fn load_strips_byte_order_marker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        fs::create_dir_all(temp.path().join("items")).expect("mkdir");
        fs::write(
            temp.path().join("items/bd-1.json"),
            "\u{feff}{\"id\":\"bd-1\"}",
        )
        .expect("write");

        let bead = store.load("bd-1").expect("load").expect("present");
        assert_eq!(bead.id, "bd-1");
        assert_eq!(bead.status, BeadStatus::Pending);
    }

    /// Loading a minimal record twice yields identical fully-defaulted output.
    #[test]
    fn defaulting_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        fs::create_dir_all(temp.path().join("items")).expect("mkdir");
        fs::write(temp.path().join("items/bd-1.json"), "{\"id\":\"bd-1\"}").expect("write");

        let first = store.load("bd-1").expect("load").expect("present");
        let second = store.load("bd-1").expect("load").expect("present");
        assert_eq!(first, second);
        assert_eq!(first.priority, LOWEST_PRIORITY);
    }

    #[test]
    fn scan_skips_corrupt_records_and_save_leftovers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);

        let mut good = Bead::new("bd-good");
        store.save(&mut good).expect("save");

        let items = temp.path().join("items");
        fs::write(items.join("bd-bad.json"), "{ not json").expect("write");
        fs::write(items.join("bd-x.json.tmp"), "half-written").expect("write");
        fs::write(items.join("bd-x.json.bak"), "old backup").expect("write");

        let beads = store.list_all().expect("list");
        let ids: Vec<&str> = beads.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-good"]);
    }

    #[test]
    fn list_eligible_orders_by_priority_then_id() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);

        for (id, priority, status) in [
            ("bd-c", 2, BeadStatus::Pending),
            ("bd-a", 1, BeadStatus::Retry),
            ("bd-b", 1, BeadStatus::Pending),
            ("bd-d", 0, BeadStatus::Completed),
            ("bd-e", 0, BeadStatus::InProgress),
        ] {
            let mut bead = Bead::new(id);
            bead.priority = priority;
            bead.status = status;
            store.save(&mut bead).expect("save");
        }

        let eligible = store.list_eligible().expect("list");
        let ids: Vec<&str> = eligible.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-a", "bd-b", "bd-c"]);
    }

    /// A failed replace reports the error and cleans up its temp file.
    ///
    /// The target path is occupied by a directory, which makes the backup
    /// step fail before anything was renamed.
    #[test]
    fn failed_replace_cleans_up_and_reports() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        let items = temp.path().join("items");
        fs::create_dir_all(items.join("bd-1.json")).expect("mkdir");

        let err = store.save(&mut Bead::new("bd-1")).unwrap_err();
        assert!(err.to_string().contains("bd-1"));
        assert!(!items.join("bd-1.json.tmp").exists());
        assert!(items.join("bd-1.json").is_dir(), "target left untouched");
    }
}
