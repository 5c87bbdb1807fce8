//! Shared types for the telemetry collector and ingestion service
//!
//! - `record`: source-side event records and their submission payloads
//! - `event`: validated submissions and stored events
//! - `store`: the SQLite-backed event store used by both processes

pub mod error;
pub mod event;
pub mod record;
pub mod store;

pub use error::{StoreError, ValidationError};
pub use event::{
    truncate_chars, EventId, NewEvent, StoredEvent, DEFAULT_LEVEL, DEFAULT_SOURCE,
    SUMMARY_MAX_CHARS,
};
pub use record::EventRecord;
pub use store::{EventFilter, EventStore, QUERY_MAX_RESULTS};
