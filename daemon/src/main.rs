//! Bead execution daemon entry point.
//!
//! `beadsd run` starts the poll loop against a project root's `.beads/`
//! directory and runs until SIGINT/SIGTERM.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use beadsd::cancel::CancelToken;
use beadsd::daemon::run_daemon;
use beadsd::io::config::{load_config, write_config};
use beadsd::io::paths::DaemonPaths;
use beadsd::io::store::BeadStore;
use beadsd::io::truth::FileTruthSource;
use beadsd::io::worker::CommandWorker;

#[derive(Parser)]
#[command(name = "beadsd", version, about = "Bead work-item execution daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon until interrupted.
    Run {
        /// Project root holding the `.beads/` directory.
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

fn main() {
    beadsd::logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { root } => cmd_run(&root),
    }
}

fn cmd_run(root: &Path) -> Result<()> {
    let paths = DaemonPaths::new(root);
    paths.ensure_layout()?;
    if !paths.config_path.exists() {
        // Scaffold an editable config on first run.
        write_config(&paths.config_path, &Default::default())?;
    }
    let config = load_config(&paths.config_path)?;

    let cancel = CancelToken::new();
    register_shutdown_signals(&cancel)?;

    let store = BeadStore::new(&paths.items_dir);
    let worker = CommandWorker::new(config.worker.command.clone());
    let truth = FileTruthSource::new(&paths.truth_dir);

    run_daemon(&paths, &config, &store, &worker, &truth, &cancel)
}

/// Translate SIGINT/SIGTERM into the cancellation token.
#[cfg(unix)]
fn register_shutdown_signals(cancel: &CancelToken) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("register signal handler")?;
    let cancel = cancel.clone();
    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            tracing::info!(signal, "shutdown signal received");
            cancel.cancel();
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn register_shutdown_signals(_cancel: &CancelToken) -> Result<()> {
    Ok(())
}
