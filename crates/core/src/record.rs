//! Source-side telemetry records
//!
//! An `EventRecord` is one entry of an append-only, sequentially numbered
//! event stream (e.g. the Sysmon operational channel). Records are never
//! mutated after the source produces them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// One record read from a telemetry source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Per-stream sequence number assigned by the source
    pub record_id: u64,
    /// Source category code (Sysmon: 1 = process create, 3 = network, ...)
    pub event_id: u32,
    pub timestamp: DateTime<Utc>,
    /// Positional insertion strings, opaque to the pipeline
    #[serde(default)]
    pub detail: Vec<String>,
}

impl EventRecord {
    pub fn new(record_id: u64, event_id: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            record_id,
            event_id,
            timestamp,
            detail: Vec::new(),
        }
    }

    pub fn with_detail<I, S>(mut self, detail: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.detail = detail.into_iter().map(Into::into).collect();
        self
    }

    /// One-line human summary used when the record is submitted as an event
    pub fn summary(&self) -> String {
        match self.detail.first() {
            Some(first) if !first.is_empty() => {
                format!("Sysmon event {}: {}", self.event_id, first)
            }
            _ => format!("Sysmon event {}", self.event_id),
        }
    }

    /// Build the submission payload for this record.
    ///
    /// The same object is written to the local store and posted to the
    /// ingestion service, so both sinks see identical content.
    pub fn to_payload(&self, source_label: &str) -> Value {
        let mut meta = Map::new();
        meta.insert("record_id".to_string(), json!(self.record_id));
        meta.insert("event_id".to_string(), json!(self.event_id));
        meta.insert("time".to_string(), json!(self.timestamp.to_rfc3339()));
        meta.insert("details".to_string(), json!(self.detail));

        json!({
            "source": source_label,
            "level": "INFO",
            "summary": self.summary(),
            "meta": meta,
        })
    }
}
