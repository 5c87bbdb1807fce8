//! Collector configuration from environment variables
//! Format: SPHERE_<SETTING>=value. Unparseable values fall back to defaults.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CHANNEL: &str = "Microsoft-Windows-Sysmon/Operational";
pub const DEFAULT_REMOTE_URL: &str = "http://127.0.0.1:5000";

#[derive(Clone, Debug, PartialEq)]
pub struct CollectorConfig {
    /// Event log channel read by wevtutil
    pub channel: String,
    pub checkpoint_path: PathBuf,
    /// SQLite file backing the local sink
    pub local_db: PathBuf,
    /// Base URL of the ingestion service
    pub remote_url: String,
    pub api_key: String,
    /// `source` field stamped on every submitted event
    pub source_label: String,
    pub poll_interval: Duration,
    pub remote_timeout: Duration,
    /// Newest records requested from the channel per poll
    pub max_records_per_poll: u64,
    /// Replay records from this JSONL file instead of the event log
    pub replay_file: Option<PathBuf>,
    pub log_dir: PathBuf,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            checkpoint_path: PathBuf::from("sysmon.checkpoint"),
            local_db: PathBuf::from("collector.db"),
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            api_key: String::new(),
            source_label: "sysmon".to_string(),
            poll_interval: Duration::from_secs(5),
            remote_timeout: Duration::from_secs(5),
            max_records_per_poll: 500,
            replay_file: None,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl CollectorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process env in production)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("SPHERE_CHANNEL") {
            cfg.channel = v;
        }
        if let Some(v) = lookup("SPHERE_CHECKPOINT_PATH") {
            cfg.checkpoint_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SPHERE_LOCAL_DB") {
            cfg.local_db = PathBuf::from(v);
        }
        if let Some(v) = lookup("SPHERE_REMOTE_URL") {
            cfg.remote_url = v;
        }
        if let Some(v) = lookup("SPHERE_API_KEY") {
            cfg.api_key = v;
        }
        if let Some(v) = lookup("SPHERE_SOURCE_LABEL") {
            cfg.source_label = v;
        }
        if let Some(secs) = lookup("SPHERE_POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            cfg.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = lookup("SPHERE_REMOTE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            cfg.remote_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = lookup("SPHERE_MAX_RECORDS_PER_POLL").and_then(|v| v.parse().ok()) {
            cfg.max_records_per_poll = n;
        }
        if let Some(v) = lookup("SPHERE_REPLAY_FILE").filter(|v| !v.is_empty()) {
            cfg.replay_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SPHERE_LOG_DIR") {
            cfg.log_dir = PathBuf::from(v);
        }

        cfg
    }
}
