//! Logging setup for the collector
//!
//! Human-readable stderr plus a daily-rotated file under the log directory

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging with file output
///
/// Returns a guard that must be held for the lifetime of the process
/// so buffered lines are flushed.
pub fn init_logging(log_dir: &Path) -> WorkerGuard {
    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "sphere-collector.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sphere_collector=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(true))
        .init();

    tracing::info!(log_dir = %log_dir.display(), "logging initialized");

    guard
}
