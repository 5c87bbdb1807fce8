//! Delivery sinks for extracted batches
//!
//! ```text
//!                 ┌──────────────┐
//!                 │  Dispatcher  │
//!                 └──────┬───────┘
//!            ┌───────────┴───────────┐
//!            ▼                       ▼
//!   ┌─────────────────┐     ┌─────────────────┐
//!   │ LocalStoreSink  │     │    HttpSink     │
//!   │ (EventStore db) │     │ POST /logs/batch│
//!   └─────────────────┘     └─────────────────┘
//! ```
//!
//! Both sinks submit the same payload (`EventRecord::to_payload`) so a
//! record looks identical locally and on the ingestion service.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use sphere_core::{EventRecord, EventStore, NewEvent, StoreError, ValidationError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("local store write failed: {0}")]
    Local(#[from] StoreError),

    #[error("payload rejected: {0}")]
    Invalid(#[from] ValidationError),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ingestion service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

/// Destination that durably accepts a batch of records
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver a batch; returns how many events the sink accepted
    fn deliver(&self, batch: &[EventRecord]) -> Result<usize, SinkError>;
}

fn batch_payload(batch: &[EventRecord], source_label: &str) -> Value {
    Value::Array(batch.iter().map(|r| r.to_payload(source_label)).collect())
}

// ============================================================================
// Local store
// ============================================================================

/// Writes batches into a local `EventStore`, normalized the same way the
/// ingestion service normalizes submissions
pub struct LocalStoreSink {
    store: Arc<EventStore>,
    source_label: String,
    summary_max: usize,
}

impl LocalStoreSink {
    pub fn new(store: Arc<EventStore>, source_label: &str, summary_max: usize) -> Self {
        Self {
            store,
            source_label: source_label.to_string(),
            summary_max,
        }
    }
}

impl EventSink for LocalStoreSink {
    fn name(&self) -> &str {
        "local"
    }

    fn deliver(&self, batch: &[EventRecord]) -> Result<usize, SinkError> {
        let payload = batch_payload(batch, &self.source_label);
        let events = NewEvent::batch_from_json(&payload, self.summary_max)?;
        let stored = self.store.insert_batch(events, Utc::now())?;
        Ok(stored.len())
    }
}

// ============================================================================
// Remote ingestion service
// ============================================================================

#[derive(Debug, Deserialize)]
struct BatchAccepted {
    #[serde(default)]
    ids: Vec<String>,
}

/// Posts batches to the ingestion service. One attempt per batch, bounded
/// by the client timeout; failures are reported, never retried.
pub struct HttpSink {
    endpoint: String,
    api_key: String,
    source_label: String,
    client: reqwest::blocking::Client,
}

impl HttpSink {
    pub fn new(
        base_url: &str,
        api_key: &str,
        source_label: &str,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            endpoint: format!("{}/logs/batch", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            source_label: source_label.to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl EventSink for HttpSink {
    fn name(&self) -> &str {
        "remote"
    }

    fn deliver(&self, batch: &[EventRecord]) -> Result<usize, SinkError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&batch_payload(batch, &self.source_label))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let accepted: BatchAccepted = response.json()?;
        Ok(accepted.ids.len())
    }
}

// ============================================================================
// In-memory sink
// ============================================================================

/// Keeps delivered records in memory; can be switched to fail on demand
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<EventRecord>>,
    failing: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.failing.lock() {
            *flag = failing;
        }
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn deliver(&self, batch: &[EventRecord]) -> Result<usize, SinkError> {
        let failing = self.failing.lock().map(|f| *f).unwrap_or(true);
        if failing {
            return Err(SinkError::Other("memory sink set to fail".to_string()));
        }
        let mut records = self
            .records
            .lock()
            .map_err(|_| SinkError::Other("memory sink poisoned".to_string()))?;
        records.extend_from_slice(batch);
        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sphere_core::EventFilter;

    fn batch() -> Vec<EventRecord> {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        vec![
            EventRecord::new(1, 1, ts).with_detail(["powershell.exe -enc AAAA"]),
            EventRecord::new(2, 3, ts).with_detail(["10.0.0.9:4444"]),
        ]
    }

    #[test]
    fn test_local_sink_writes_normalized_events() {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let sink = LocalStoreSink::new(store.clone(), "sysmon", 200);

        assert_eq!(sink.deliver(&batch()).unwrap(), 2);
        assert_eq!(store.count().unwrap(), 2);

        let events = store.query(&EventFilter::default()).unwrap();
        assert!(events.iter().all(|e| e.source == "sysmon" && e.level == "INFO"));
        assert!(events
            .iter()
            .any(|e| e.summary == "Sysmon event 3: 10.0.0.9:4444"));
    }

    #[test]
    fn test_local_sink_truncates_summary() {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let sink = LocalStoreSink::new(store.clone(), "sysmon", 16);
        sink.deliver(&batch()).unwrap();
        assert!(store
            .recent(10)
            .unwrap()
            .iter()
            .all(|e| e.summary.chars().count() <= 16));
    }

    #[test]
    fn test_http_sink_endpoint() {
        let sink =
            HttpSink::new("http://127.0.0.1:5000/", "k", "sysmon", Duration::from_secs(1))
                .unwrap();
        assert_eq!(sink.endpoint(), "http://127.0.0.1:5000/logs/batch");
    }

    #[test]
    fn test_http_sink_unreachable_is_error() {
        // port 9 (discard) is closed on test machines; connection is refused
        let sink = HttpSink::new("http://127.0.0.1:9", "k", "sysmon", Duration::from_millis(500))
            .unwrap();
        assert!(matches!(sink.deliver(&batch()), Err(SinkError::Http(_))));
    }

    #[test]
    fn test_memory_sink_failure_toggle() {
        let sink = MemorySink::new();
        assert_eq!(sink.deliver(&batch()).unwrap(), 2);
        sink.set_failing(true);
        assert!(sink.deliver(&batch()).is_err());
        assert_eq!(sink.records().len(), 2);
    }
}
