//! Logging setup for the ingestion service
//!
//! JSON lines on stdout for log shippers, plain text in a daily-rotated file.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Returns a guard that must be held until shutdown so the file writer flushes
pub fn init_logging(log_dir: &Path) -> WorkerGuard {
    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "sphere-server.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sphere_server=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(fmt::layer().json().with_writer(std::io::stdout))
        .init();

    tracing::info!(log_dir = %log_dir.display(), "logging initialized");

    guard
}
