//! Telemetry source readers
//!
//! A source hands back whatever window of the event stream it can see, in
//! its native order. Filtering against the checkpoint and re-ordering are
//! left to `extract`, so readers stay thin I/O adapters.
//!
//! - `WevtutilSource`: Windows Event Log channel via `wevtutil qe /rd:true`
//!   (newest first), parsed from the XML rendering
//! - `JsonlSource`: replays `EventRecord`s from a JSONL file

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use sphere_core::EventRecord;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source {source_name} unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    #[error("source {source_name} returned unparseable data: {reason}")]
    Parse { source_name: String, reason: String },
}

/// Reader over a sequentially numbered event stream
pub trait TelemetrySource {
    fn name(&self) -> &str;

    /// Read the currently visible records in source-native order
    fn read(&mut self) -> Result<Vec<EventRecord>, SourceError>;

    /// Most records one `read` can return, if the source caps its window
    fn window_limit(&self) -> Option<usize> {
        None
    }
}

impl<T: TelemetrySource + ?Sized> TelemetrySource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read(&mut self) -> Result<Vec<EventRecord>, SourceError> {
        (**self).read()
    }

    fn window_limit(&self) -> Option<usize> {
        (**self).window_limit()
    }
}

// ============================================================================
// Windows Event Log (wevtutil)
// ============================================================================

pub struct WevtutilSource {
    channel: String,
    max_records: u64,
}

impl WevtutilSource {
    pub fn new(channel: impl Into<String>, max_records: u64) -> Self {
        Self {
            channel: channel.into(),
            max_records,
        }
    }

    fn unavailable(&self, reason: impl Into<String>) -> SourceError {
        SourceError::Unavailable {
            source_name: self.channel.clone(),
            reason: reason.into(),
        }
    }
}

impl TelemetrySource for WevtutilSource {
    fn name(&self) -> &str {
        &self.channel
    }

    fn read(&mut self) -> Result<Vec<EventRecord>, SourceError> {
        let count_arg = format!("/c:{}", self.max_records);
        let output = Command::new("wevtutil")
            .args(["qe", self.channel.as_str(), "/rd:true", count_arg.as_str(), "/f:xml"])
            .output()
            .map_err(|e| self.unavailable(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.unavailable(format!(
                "wevtutil exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let xml = String::from_utf8_lossy(&output.stdout);
        let (records, skipped) =
            parse_event_xml(&xml).map_err(|reason| SourceError::Parse {
                source_name: self.channel.clone(),
                reason,
            })?;

        if skipped > 0 {
            tracing::warn!(channel = %self.channel, skipped, "skipped incomplete event records");
        }
        Ok(records)
    }

    fn window_limit(&self) -> Option<usize> {
        usize::try_from(self.max_records).ok()
    }
}

#[derive(Default)]
struct PartialRecord {
    record_id: Option<u64>,
    event_id: Option<u32>,
    timestamp: Option<DateTime<Utc>>,
    detail: Vec<String>,
}

impl PartialRecord {
    fn finish(self) -> Option<EventRecord> {
        Some(EventRecord {
            record_id: self.record_id?,
            event_id: self.event_id?,
            timestamp: self.timestamp?,
            detail: self.detail,
        })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum TextTarget {
    None,
    EventId,
    RecordId,
}

/// Parse `wevtutil /f:xml` output (a sequence of `<Event>` elements with no
/// root) into records, preserving document order.
///
/// Returns the records plus the number of `<Event>` elements that lacked a
/// record id, event id or creation time.
pub fn parse_event_xml(xml: &str) -> Result<(Vec<EventRecord>, usize), String> {
    let wrapped = format!("<Events>{xml}</Events>");
    let mut reader = Reader::from_str(&wrapped);
    reader.trim_text(true);

    let mut records = Vec::new();
    let mut skipped = 0usize;
    let mut current: Option<PartialRecord> = None;
    let mut target = TextTarget::None;
    let mut data: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(ref e)) => match e.local_name().as_ref() {
                b"Event" => current = Some(PartialRecord::default()),
                b"EventID" => target = TextTarget::EventId,
                b"EventRecordID" => target = TextTarget::RecordId,
                b"TimeCreated" => set_time_created(current.as_mut(), e),
                b"Data" => data = Some(String::new()),
                _ => {}
            },
            Ok(XmlEvent::Empty(ref e)) => match e.local_name().as_ref() {
                b"TimeCreated" => set_time_created(current.as_mut(), e),
                b"Data" => {
                    if let Some(rec) = current.as_mut() {
                        rec.detail.push(String::new());
                    }
                }
                _ => {}
            },
            Ok(XmlEvent::Text(ref t)) => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                if let Some(buf) = data.as_mut() {
                    buf.push_str(&text);
                } else if let Some(rec) = current.as_mut() {
                    match target {
                        TextTarget::EventId => rec.event_id = text.trim().parse().ok(),
                        TextTarget::RecordId => rec.record_id = text.trim().parse().ok(),
                        TextTarget::None => {}
                    }
                }
            }
            Ok(XmlEvent::End(ref e)) => match e.local_name().as_ref() {
                b"EventID" | b"EventRecordID" => target = TextTarget::None,
                b"Data" => {
                    if let (Some(rec), Some(value)) = (current.as_mut(), data.take()) {
                        rec.detail.push(value);
                    }
                }
                b"Event" => {
                    if let Some(partial) = current.take() {
                        match partial.finish() {
                            Some(record) => records.push(record),
                            None => skipped += 1,
                        }
                    }
                }
                _ => {}
            },
            Ok(XmlEvent::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "xml error at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
        }
    }

    Ok((records, skipped))
}

fn set_time_created(current: Option<&mut PartialRecord>, e: &BytesStart<'_>) {
    let Some(rec) = current else { return };
    for attr in e.attributes().filter_map(Result::ok) {
        if attr.key.local_name().as_ref() == b"SystemTime" {
            if let Ok(value) = attr.unescape_value() {
                rec.timestamp = DateTime::parse_from_rfc3339(&value)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            }
        }
    }
}

// ============================================================================
// JSONL replay
// ============================================================================

/// Replays records from a JSONL file, one `EventRecord` per line.
/// File order is treated as the source-native order.
pub struct JsonlSource {
    path: PathBuf,
    name: String,
}

impl JsonlSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("jsonl:{}", path.display());
        Self { path, name }
    }
}

impl TelemetrySource for JsonlSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Vec<EventRecord>, SourceError> {
        let content =
            std::fs::read_to_string(&self.path).map_err(|e| SourceError::Unavailable {
                source_name: self.name.clone(),
                reason: e.to_string(),
            })?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EventRecord>(line) {
                Ok(record) => records.push(record),
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::warn!(source = %self.name, skipped, "skipped unparseable lines");
        }
        Ok(records)
    }
}
