//! sphere-collector entry point
//!
//! Pipeline: event log (or JSONL replay) -> extract -> {local store, ingestion service} -> checkpoint

use anyhow::Context;
use clap::Parser;
use sphere_collector::{
    Collector, CheckpointStore, CollectorConfig, Dispatcher, HttpSink, JsonlSource,
    LocalStoreSink, TelemetrySource, WevtutilSource,
};
use sphere_core::{EventStore, SUMMARY_MAX_CHARS};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "sphere-collector")]
#[command(about = "Incremental Sysmon collector with checkpointed delivery")]
struct Args {
    /// Ingestion service base URL (overrides SPHERE_REMOTE_URL)
    #[arg(long)]
    remote_url: Option<String>,

    /// Checkpoint file (overrides SPHERE_CHECKPOINT_PATH)
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Replay records from a JSONL file instead of the event log
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Seconds between cycles (overrides SPHERE_POLL_INTERVAL_SECS)
    #[arg(long)]
    interval: Option<u64>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = CollectorConfig::from_env();
    if let Some(url) = args.remote_url {
        config.remote_url = url;
    }
    if let Some(path) = args.checkpoint {
        config.checkpoint_path = path;
    }
    if let Some(path) = args.replay {
        config.replay_file = Some(path);
    }
    if let Some(secs) = args.interval {
        config.poll_interval = Duration::from_secs(secs);
    }

    let _guard = sphere_collector::logging::init_logging(&config.log_dir);

    if config.api_key.is_empty() {
        tracing::warn!("SPHERE_API_KEY is empty; the ingestion service will reject every batch");
    }

    let store = Arc::new(
        EventStore::open(&config.local_db)
            .with_context(|| format!("opening local store {}", config.local_db.display()))?,
    );
    let local = LocalStoreSink::new(store.clone(), &config.source_label, SUMMARY_MAX_CHARS);
    let remote = HttpSink::new(
        &config.remote_url,
        &config.api_key,
        &config.source_label,
        config.remote_timeout,
    )?;
    tracing::info!(endpoint = remote.endpoint(), local_db = %config.local_db.display(), "sinks ready");
    let dispatcher = Dispatcher::new(Box::new(local), Box::new(remote));

    let source: Box<dyn TelemetrySource> = match &config.replay_file {
        Some(path) => Box::new(JsonlSource::new(path)),
        None => Box::new(WevtutilSource::new(
            config.channel.clone(),
            config.max_records_per_poll,
        )),
    };

    let mut collector = Collector::new(
        source,
        dispatcher,
        CheckpointStore::new(&config.checkpoint_path),
    )
    .context("loading checkpoint")?;

    if args.once {
        let report = collector.run_cycle();
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
    } else {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutdown requested");
            shutdown_clone.store(true, Ordering::Relaxed);
        })
        .context("installing Ctrl-C handler")?;

        collector.run(&shutdown, config.poll_interval);
    }

    drop(collector);
    if let Ok(store) = Arc::try_unwrap(store) {
        store.close()?;
    }
    Ok(())
}

fn report_json(report: &sphere_collector::CycleReport) -> serde_json::Value {
    serde_json::json!({
        "records_read": report.records_read,
        "batch_size": report.batch_size,
        "local": format!("{:?}", report.local),
        "remote": format!("{:?}", report.remote),
        "checkpoint_before": report.checkpoint_before,
        "checkpoint_after": report.checkpoint_after,
        "source_error": report.source_error,
    })
}
