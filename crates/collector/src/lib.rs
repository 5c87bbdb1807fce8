//! Incremental telemetry collector
//!
//! Reads a sequentially numbered event stream, extracts the records past
//! the persisted checkpoint, delivers them to a local store and to the
//! ingestion service, then advances the checkpoint.

pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod dispatch;
pub mod extract;
pub mod logging;
pub mod sink;
pub mod source;

pub use checkpoint::{CheckpointError, CheckpointStore};
pub use collector::{Collector, CycleReport, SinkStatus};
pub use config::CollectorConfig;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use extract::{extract, max_record_id};
pub use sink::{EventSink, HttpSink, LocalStoreSink, MemorySink, SinkError};
pub use source::{JsonlSource, SourceError, TelemetrySource, WevtutilSource};
