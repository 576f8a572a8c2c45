/// Tracing setup: console output plus a per-run plain-text log file.
///
/// The log file is named after the run date (`NFDRS_log_MMDDYYYY.txt`) so a
/// re-run for the same date appends to the same file.

use chrono::NaiveDate;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log file path for a run date inside `log_dir`.
pub fn log_file_path(log_dir: &Path, run_date: NaiveDate) -> PathBuf {
    log_dir.join(format!("NFDRS_log_{}.txt", run_date.format("%m%d%Y")))
}

/// Installs the global subscriber. `RUST_LOG` overrides the default `info`
/// filter. Returns the log file path.
pub fn init(log_dir: &Path, run_date: NaiveDate) -> io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let path = log_file_path(log_dir, run_date);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console = tracing_subscriber::fmt::layer().with_target(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file));

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;

    Ok(path)
}

/// Console-only subscriber for tools that should not write a log file.
pub fn init_console() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .try_init();
}
