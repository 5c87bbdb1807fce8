//! Service configuration from environment variables

use sphere_core::{QUERY_MAX_RESULTS, SUMMARY_MAX_CHARS};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    /// Shared secret for protected routes. Empty rejects every request.
    pub api_key: String,
    pub port: u16,
    pub log_dir: PathBuf,
    /// Upper bound applied to `/logs/recent?limit=`
    pub recent_max: usize,
    pub summary_max: usize,
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("sphere.db"),
            api_key: String::new(),
            port: 5000,
            log_dir: PathBuf::from("logs"),
            recent_max: QUERY_MAX_RESULTS,
            summary_max: SUMMARY_MAX_CHARS,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("SPHERE_DB_PATH") {
            cfg.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SPHERE_API_KEY") {
            cfg.api_key = v;
        }
        if let Some(port) = lookup("PORT").and_then(|v| v.parse().ok()) {
            cfg.port = port;
        }
        if let Some(v) = lookup("SPHERE_LOG_DIR") {
            cfg.log_dir = PathBuf::from(v);
        }
        if let Some(n) = lookup("SPHERE_RECENT_MAX").and_then(|v| v.parse().ok()) {
            cfg.recent_max = n;
        }
        if let Some(n) = lookup("SPHERE_SUMMARY_MAX").and_then(|v| v.parse().ok()) {
            cfg.summary_max = n;
        }
        if let Some(secs) = lookup("SPHERE_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            cfg.request_timeout = Duration::from_secs(secs);
        }

        cfg
    }
}
