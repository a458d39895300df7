//! Test-only helpers: bead builders, a temp-dir store, and scripted doubles
//! for the worker and truth-source seams.

use std::collections::HashSet;
use std::fs;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::Utc;

use crate::bead::{Bead, BeadStatus};
use crate::cancel::CancelToken;
use crate::io::paths::DaemonPaths;
use crate::io::store::BeadStore;
use crate::io::truth::{TruthRecord, TruthSource};
use crate::io::worker::{WorkerExit, WorkerInvoker, WorkerRequest};

/// A bead store rooted in a fresh temp directory.
pub struct TestStore {
    pub temp: tempfile::TempDir,
    pub paths: DaemonPaths,
    pub store: BeadStore,
}

impl TestStore {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = DaemonPaths::new(temp.path());
        paths.ensure_layout().expect("ensure layout");
        let store = BeadStore::new(&paths.items_dir);
        Self { temp, paths, store }
    }

    pub fn root(&self) -> &std::path::Path {
        self.temp.path()
    }

    /// Save a bead and return it with its stamped timestamps.
    pub fn seed(&self, mut bead: Bead) -> Bead {
        self.store.save(&mut bead).expect("seed bead");
        bead
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A pending bead with an explicit priority.
pub fn pending_bead(id: &str, priority: i64) -> Bead {
    let mut bead = Bead::new(id);
    bead.priority = priority;
    bead.title = format!("{id} title");
    bead
}

/// An `in_progress` bead whose last attempt was `age` ago.
pub fn in_progress_bead(id: &str, age: chrono::Duration) -> Bead {
    let mut bead = pending_bead(id, 1);
    bead.status = BeadStatus::InProgress;
    bead.meta.attempt_count = 1;
    bead.meta.last_attempt = Some(Utc::now() - age);
    bead
}

pub fn exit_with(code: i32) -> WorkerExit {
    WorkerExit {
        exit_code: Some(code),
        timed_out: false,
    }
}

/// One scripted worker invocation.
#[derive(Debug, Clone)]
pub struct ScriptedInvocation {
    pub exit: WorkerExit,
    /// Status written over the record file before returning, simulating a
    /// worker that rewrites its own record while running.
    pub rewrite_status: Option<BeadStatus>,
}

impl ScriptedInvocation {
    pub fn exit(exit: WorkerExit) -> Self {
        Self {
            exit,
            rewrite_status: None,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            exit: WorkerExit {
                exit_code: None,
                timed_out: true,
            },
            rewrite_status: None,
        }
    }

    pub fn rewriting_status(mut self, status: BeadStatus) -> Self {
        self.rewrite_status = Some(status);
        self
    }
}

/// Worker double that replays scripted invocations in order.
pub struct ScriptedWorker {
    script: Mutex<Vec<ScriptedInvocation>>,
    invoked: Mutex<Vec<String>>,
    fail_with: Option<String>,
}

impl ScriptedWorker {
    pub fn new(script: Vec<ScriptedInvocation>) -> Self {
        Self {
            script: Mutex::new(script),
            invoked: Mutex::new(Vec::new()),
            fail_with: None,
        }
    }

    /// A worker whose every invocation errors (e.g. missing binary).
    pub fn failing(message: &str) -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            invoked: Mutex::new(Vec::new()),
            fail_with: Some(message.to_string()),
        }
    }

    /// Bead ids in invocation order.
    pub fn invoked_ids(&self) -> Vec<String> {
        self.invoked.lock().expect("lock").clone()
    }
}

impl WorkerInvoker for ScriptedWorker {
    fn invoke(&self, request: &WorkerRequest, _cancel: &CancelToken) -> Result<WorkerExit> {
        self.invoked
            .lock()
            .expect("lock")
            .push(request.bead_id.clone());

        if let Some(message) = &self.fail_with {
            return Err(anyhow!("{message}"));
        }

        let mut script = self.script.lock().expect("lock");
        if script.is_empty() {
            return Err(anyhow!(
                "unscripted worker invocation for bead {}",
                request.bead_id
            ));
        }
        let invocation = script.remove(0);
        drop(script);

        if let Some(status) = invocation.rewrite_status {
            // Emulate an external writer: plain write, no store stamping.
            let raw = fs::read_to_string(&request.payload_path)?;
            let mut value: serde_json::Value = serde_json::from_str(&raw)?;
            value["status"] = serde_json::Value::String(status.as_str().to_string());
            fs::write(&request.payload_path, value.to_string())?;
        }

        Ok(invocation.exit)
    }
}

/// Truth-source double backed by a fixed set of done ids.
pub struct ScriptedTruth {
    done: HashSet<String>,
}

impl ScriptedTruth {
    pub fn done_for<I: IntoIterator<Item = impl Into<String>>>(ids: I) -> Self {
        Self {
            done: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn never_done() -> Self {
        Self {
            done: HashSet::new(),
        }
    }
}

impl TruthSource for ScriptedTruth {
    fn lookup(&self, id: &str) -> Result<TruthRecord> {
        Ok(TruthRecord {
            done: self.done.contains(id),
        })
    }
}
