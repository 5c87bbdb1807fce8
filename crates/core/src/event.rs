//! Service-side event types and submission schema
//!
//! Submissions arrive as loosely structured JSON. `NewEvent::from_json`
//! is the single validation step: it either yields a fully defaulted,
//! typed event or a `ValidationError`, never a partial object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;

pub const DEFAULT_SOURCE: &str = "unknown";
pub const DEFAULT_LEVEL: &str = "INFO";
pub const SUMMARY_MAX_CHARS: usize = 200;

/// Keys the service assigns itself; client values are discarded.
const SERVER_ASSIGNED_KEYS: &[&str] = &["id", "_id", "received_at"];

// ============================================================================
// Event identifier
// ============================================================================

/// Service-assigned event identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the textual form. Anything that is not a UUID is malformed.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ValidationError::InvalidId(s.to_string()))
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for EventId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ============================================================================
// Validated submission
// ============================================================================

/// A validated, defaulted submission that has not been stored yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub source: String,
    pub level: String,
    pub summary: String,
    pub processes: Vec<Value>,
    pub files_changed: Vec<Value>,
    pub network_calls: Vec<Value>,
    pub artifacts: Map<String, Value>,
    pub meta: Map<String, Value>,
}

impl Default for NewEvent {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            level: DEFAULT_LEVEL.to_string(),
            summary: String::new(),
            processes: Vec::new(),
            files_changed: Vec::new(),
            network_calls: Vec::new(),
            artifacts: Map::new(),
            meta: Map::new(),
        }
    }
}

impl NewEvent {
    /// Validate a submitted JSON value.
    ///
    /// Rules:
    /// - the value must be an object
    /// - recognized fields must have the right JSON type; `null` counts as absent
    /// - `summary` is cut to `summary_max` characters
    /// - unrecognized keys are kept in `meta` (an explicit `meta` key wins)
    /// - `id` / `received_at` supplied by the client are dropped
    pub fn from_json(value: &Value, summary_max: usize) -> Result<Self, ValidationError> {
        let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

        let mut event = Self::default();
        let mut extra = Map::new();

        for (key, v) in obj {
            if v.is_null() {
                continue;
            }
            match key.as_str() {
                "source" => event.source = string_field(key, v)?,
                "level" => event.level = string_field(key, v)?,
                "summary" => event.summary = truncate_chars(&string_field(key, v)?, summary_max),
                "processes" => event.processes = array_field(key, v)?,
                "files_changed" => event.files_changed = array_field(key, v)?,
                "network_calls" => event.network_calls = array_field(key, v)?,
                "artifacts" => event.artifacts = object_field(key, v)?,
                "meta" => event.meta = object_field(key, v)?,
                k if SERVER_ASSIGNED_KEYS.contains(&k) => {}
                _ => {
                    extra.insert(key.clone(), v.clone());
                }
            }
        }

        for (key, v) in extra {
            event.meta.entry(key).or_insert(v);
        }

        Ok(event)
    }

    /// Validate every element of a batch; the first failure rejects all.
    pub fn batch_from_json(value: &Value, summary_max: usize) -> Result<Vec<Self>, ValidationError> {
        let items = value.as_array().ok_or(ValidationError::NotAnArray)?;
        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                Self::from_json(item, summary_max).map_err(|e| ValidationError::BatchItem {
                    index,
                    reason: Box::new(e),
                })
            })
            .collect()
    }

    pub fn into_stored(self, id: EventId, received_at: DateTime<Utc>) -> StoredEvent {
        StoredEvent {
            id,
            source: self.source,
            level: self.level,
            summary: self.summary,
            processes: self.processes,
            files_changed: self.files_changed,
            network_calls: self.network_calls,
            artifacts: self.artifacts,
            meta: self.meta,
            received_at,
        }
    }
}

fn string_field(key: &str, v: &Value) -> Result<String, ValidationError> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| ValidationError::wrong_type(key, "string"))
}

fn array_field(key: &str, v: &Value) -> Result<Vec<Value>, ValidationError> {
    v.as_array()
        .cloned()
        .ok_or_else(|| ValidationError::wrong_type(key, "array"))
}

fn object_field(key: &str, v: &Value) -> Result<Map<String, Value>, ValidationError> {
    v.as_object()
        .cloned()
        .ok_or_else(|| ValidationError::wrong_type(key, "object"))
}

/// Truncate on character boundaries, never inside a code point
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

// ============================================================================
// Stored event
// ============================================================================

/// An event as persisted by the ingestion service. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: EventId,
    pub source: String,
    pub level: String,
    pub summary: String,
    #[serde(default)]
    pub processes: Vec<Value>,
    #[serde(default)]
    pub files_changed: Vec<Value>,
    #[serde(default)]
    pub network_calls: Vec<Value>,
    #[serde(default)]
    pub artifacts: Map<String, Value>,
    #[serde(default)]
    pub meta: Map<String, Value>,
    pub received_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Category used for grouping: `meta.category` if set, else the source
    pub fn category(&self) -> &str {
        self.meta
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or(&self.source)
    }
}
