//! Collector loop: read -> extract -> dispatch -> checkpoint
//!
//! Checkpoint advance is at-most-once: once a batch has been handed to the
//! dispatcher the checkpoint moves past it, whether or not either sink
//! accepted it. A failed remote delivery is therefore never resent.
//!
//! A source with a capped read window can fall behind: when a full window
//! starts past `checkpoint + 1`, the records in between are gone for good.
//! The cycle logs a warning and reports how many were missed.

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::dispatch::Dispatcher;
use crate::extract::{extract, max_record_id};
use crate::source::TelemetrySource;
use sphere_core::EventRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Upper bound on one uninterrupted sleep slice while waiting between cycles
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Delivery status of one sink for one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkStatus {
    /// Nothing to deliver this cycle
    Skipped,
    Delivered(usize),
    Failed(String),
}

impl SinkStatus {
    fn from_result<E: std::fmt::Display>(result: &Result<usize, E>) -> Self {
        match result {
            Ok(n) => SinkStatus::Delivered(*n),
            Err(e) => SinkStatus::Failed(e.to_string()),
        }
    }
}

/// What happened during one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub records_read: usize,
    pub batch_size: usize,
    pub local: SinkStatus,
    pub remote: SinkStatus,
    pub checkpoint_before: u64,
    pub checkpoint_after: u64,
    /// Set when the source could not be read; the cycle did nothing else
    pub source_error: Option<String>,
    /// Records that fell out of a full read window before they were seen
    pub missed_records: u64,
}

impl CycleReport {
    fn idle(checkpoint: u64) -> Self {
        Self {
            records_read: 0,
            batch_size: 0,
            local: SinkStatus::Skipped,
            remote: SinkStatus::Skipped,
            checkpoint_before: checkpoint,
            checkpoint_after: checkpoint,
            source_error: None,
            missed_records: 0,
        }
    }
}

pub struct Collector<S: TelemetrySource> {
    source: S,
    dispatcher: Dispatcher,
    checkpoints: CheckpointStore,
    checkpoint: u64,
}

impl<S: TelemetrySource> Collector<S> {
    /// Build a collector, loading the last persisted checkpoint.
    /// A corrupt checkpoint file is an error, not a silent restart from 0.
    pub fn new(
        source: S,
        dispatcher: Dispatcher,
        checkpoints: CheckpointStore,
    ) -> Result<Self, CheckpointError> {
        let checkpoint = checkpoints.load()?;
        tracing::info!(
            source = source.name(),
            checkpoint,
            path = %checkpoints.path().display(),
            "checkpoint loaded"
        );
        Ok(Self {
            source,
            dispatcher,
            checkpoints,
            checkpoint,
        })
    }

    pub fn checkpoint(&self) -> u64 {
        self.checkpoint
    }

    /// Run one read/extract/dispatch/checkpoint cycle
    pub fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::idle(self.checkpoint);

        let raw = match self.source.read() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(source = self.source.name(), error = %e, "source read failed");
                report.source_error = Some(e.to_string());
                return report;
            }
        };
        report.records_read = raw.len();
        report.missed_records = self.missed_behind_window(&raw);
        if report.missed_records > 0 {
            tracing::warn!(
                source = self.source.name(),
                checkpoint = self.checkpoint,
                missed = report.missed_records,
                window = report.records_read,
                "read window is full and starts past the checkpoint; records were skipped"
            );
        }

        let batch = extract(raw, self.checkpoint);
        let Some(batch_max) = max_record_id(&batch) else {
            tracing::debug!(read = report.records_read, checkpoint = self.checkpoint, "no new records");
            return report;
        };
        report.batch_size = batch.len();

        let outcome = self.dispatcher.dispatch(&batch);
        report.local = SinkStatus::from_result(&outcome.local);
        report.remote = SinkStatus::from_result(&outcome.remote);

        // advance regardless of delivery outcome
        self.checkpoint = self.checkpoint.max(batch_max);
        if let Err(e) = self.checkpoints.save(self.checkpoint) {
            tracing::error!(checkpoint = self.checkpoint, error = %e, "checkpoint save failed");
        }
        report.checkpoint_after = self.checkpoint;

        tracing::info!(
            batch = report.batch_size,
            checkpoint = self.checkpoint,
            local = ?report.local,
            remote = ?report.remote,
            "cycle complete"
        );
        report
    }

    /// Count of ids between the checkpoint and the oldest visible record when
    /// the read came back as a full window. Zero before the first checkpoint,
    /// since an initial read never promises history.
    fn missed_behind_window(&self, raw: &[EventRecord]) -> u64 {
        let Some(limit) = self.source.window_limit() else {
            return 0;
        };
        if self.checkpoint == 0 || raw.len() < limit {
            return 0;
        }
        raw.iter()
            .map(|r| r.record_id)
            .min()
            .map_or(0, |oldest| oldest.saturating_sub(self.checkpoint.saturating_add(1)))
    }

    /// Cycle until `stop` is set, sleeping `interval` between cycles.
    /// The sleep is sliced so a stop request is honoured promptly.
    pub fn run(&mut self, stop: &AtomicBool, interval: Duration) {
        tracing::info!(source = self.source.name(), interval_ms = interval.as_millis() as u64, "collector started");

        while !stop.load(Ordering::Relaxed) {
            self.run_cycle();
            sleep_unless_stopped(stop, interval);
        }

        tracing::info!(checkpoint = self.checkpoint, "collector stopped");
    }
}

fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
    let mut remaining = total;
    while !remaining.is_zero() && !stop.load(Ordering::Relaxed) {
        let slice = remaining.min(SLEEP_SLICE);
        std::thread::sleep(slice);
        remaining -= slice;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::source::SourceError;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Instant;

    struct FixedSource(Vec<u64>);

    impl TelemetrySource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        fn read(&mut self) -> Result<Vec<EventRecord>, SourceError> {
            Ok(self
                .0
                .iter()
                .rev()
                .map(|&id| EventRecord::new(id, 1, Utc::now()))
                .collect())
        }
    }

    /// Serves the newest `limit` ids of a stream whose head is `head`
    struct WindowedSource {
        head: u64,
        limit: usize,
    }

    impl TelemetrySource for WindowedSource {
        fn name(&self) -> &str {
            "windowed"
        }

        fn read(&mut self) -> Result<Vec<EventRecord>, SourceError> {
            let oldest = self.head.saturating_sub(self.limit as u64 - 1).max(1);
            Ok((oldest..=self.head)
                .rev()
                .map(|id| EventRecord::new(id, 1, Utc::now()))
                .collect())
        }

        fn window_limit(&self) -> Option<usize> {
            Some(self.limit)
        }
    }

    struct BrokenSource;

    impl TelemetrySource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        fn read(&mut self) -> Result<Vec<EventRecord>, SourceError> {
            Err(SourceError::Unavailable {
                source_name: "broken".to_string(),
                reason: "channel not found".to_string(),
            })
        }
    }

    fn memory_dispatcher() -> Dispatcher {
        Dispatcher::new(Box::new(MemorySink::new()), Box::new(MemorySink::new()))
    }

    #[test]
    fn test_cycle_advances_and_persists_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sysmon.checkpoint");
        let mut collector = Collector::new(
            FixedSource(vec![1, 2, 3]),
            memory_dispatcher(),
            CheckpointStore::new(&path),
        )
        .unwrap();

        let report = collector.run_cycle();
        assert_eq!(report.records_read, 3);
        assert_eq!(report.batch_size, 3);
        assert_eq!(report.local, SinkStatus::Delivered(3));
        assert_eq!(report.checkpoint_before, 0);
        assert_eq!(report.checkpoint_after, 3);
        assert_eq!(CheckpointStore::new(&path).load().unwrap(), 3);

        // same window again: nothing new
        let report = collector.run_cycle();
        assert_eq!(report.batch_size, 0);
        assert_eq!(report.local, SinkStatus::Skipped);
        assert_eq!(report.checkpoint_after, 3);
    }

    #[test]
    fn test_source_error_leaves_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("c"));
        store.save(10).unwrap();

        let mut collector = Collector::new(BrokenSource, memory_dispatcher(), store).unwrap();
        let report = collector.run_cycle();
        assert!(report.source_error.is_some());
        assert_eq!(report.checkpoint_after, 10);
    }

    #[test]
    fn test_full_window_past_checkpoint_reports_missed_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("c"));
        store.save(5).unwrap();

        // ids 8..=10 visible, 6 and 7 already rotated out
        let mut collector = Collector::new(
            WindowedSource { head: 10, limit: 3 },
            memory_dispatcher(),
            store,
        )
        .unwrap();
        let report = collector.run_cycle();
        assert_eq!(report.missed_records, 2);
        assert_eq!(report.batch_size, 3);
        assert_eq!(report.checkpoint_after, 10);
    }

    #[test]
    fn test_window_reaching_checkpoint_misses_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("c"));
        store.save(7).unwrap();

        let mut collector = Collector::new(
            WindowedSource { head: 10, limit: 3 },
            memory_dispatcher(),
            store,
        )
        .unwrap();
        let report = collector.run_cycle();
        assert_eq!(report.missed_records, 0);
        assert_eq!(report.batch_size, 3);
    }

    #[test]
    fn test_first_read_never_reports_missed_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = Collector::new(
            WindowedSource { head: 500, limit: 3 },
            memory_dispatcher(),
            CheckpointStore::new(dir.path().join("c")),
        )
        .unwrap();
        let report = collector.run_cycle();
        assert_eq!(report.missed_records, 0);
        assert_eq!(report.checkpoint_after, 500);
    }

    #[test]
    fn test_run_stops_during_sleep() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = Collector::new(
            FixedSource(vec![1]),
            memory_dispatcher(),
            CheckpointStore::new(dir.path().join("c")),
        )
        .unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let setter = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(300));
                stop.store(true, Ordering::Relaxed);
            })
        };

        let started = Instant::now();
        collector.run(&stop, Duration::from_secs(60));
        setter.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(collector.checkpoint(), 1);
    }

    #[test]
    fn test_run_with_stop_already_set_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = Collector::new(
            FixedSource(vec![1, 2]),
            memory_dispatcher(),
            CheckpointStore::new(dir.path().join("c")),
        )
        .unwrap();

        collector.run(&AtomicBool::new(true), Duration::from_secs(1));
        assert_eq!(collector.checkpoint(), 0);
    }
}
