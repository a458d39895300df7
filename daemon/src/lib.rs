//! Bead execution daemon.
//!
//! A long-running process that discovers pending work items ("beads") stored
//! as one JSON file each, executes every item in an isolated worker process
//! under a hard timeout, persists outcome state crash-safely, recovers
//! records stranded by a crash, and retries failures with bounded
//! exponential backoff. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (completion decision, restart
//!   backoff). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (record store, configuration,
//!   process execution, pid marker, truth lookup). Isolated to enable
//!   scripted doubles in tests.
//!
//! Orchestration modules ([`execute`], [`reconcile`], [`daemon`]) coordinate
//! core logic with I/O to implement the poll loop.

pub mod bead;
pub mod cancel;
pub mod core;
pub mod daemon;
pub mod execute;
pub mod io;
pub mod logging;
pub mod reconcile;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
