//! End-to-end collector cycles against in-process sinks
//!
//! Covers checkpoint monotonicity under delivery failures, restart from a
//! persisted checkpoint and the local store contents after several cycles.

use chrono::{TimeZone, Utc};
use sphere_collector::{
    CheckpointStore, Collector, Dispatcher, EventSink, LocalStoreSink, MemorySink, SinkError,
    SinkStatus, SourceError, TelemetrySource,
};
use sphere_core::{EventRecord, EventStore};
use std::sync::{Arc, Mutex};

/// Event stream that tests append to between cycles; read newest first
#[derive(Clone, Default)]
struct GrowingStream {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl GrowingStream {
    fn append(&self, ids: impl IntoIterator<Item = u64>) {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut records = self.records.lock().unwrap();
        for id in ids {
            records.push(EventRecord::new(id, 1, ts).with_detail([format!("image-{id}.exe")]));
        }
    }
}

impl TelemetrySource for GrowingStream {
    fn name(&self) -> &str {
        "growing"
    }

    fn read(&mut self) -> Result<Vec<EventRecord>, SourceError> {
        let mut records = self.records.lock().unwrap().clone();
        records.reverse();
        Ok(records)
    }
}

struct SharedSink(Arc<MemorySink>);

impl EventSink for SharedSink {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn deliver(&self, batch: &[EventRecord]) -> Result<usize, SinkError> {
        self.0.deliver(batch)
    }
}

struct Harness {
    stream: GrowingStream,
    local: Arc<MemorySink>,
    remote: Arc<MemorySink>,
    collector: Collector<GrowingStream>,
}

fn harness(checkpoint_path: &std::path::Path) -> Harness {
    let stream = GrowingStream::default();
    let local = Arc::new(MemorySink::new());
    let remote = Arc::new(MemorySink::new());
    let dispatcher = Dispatcher::new(
        Box::new(SharedSink(local.clone())),
        Box::new(SharedSink(remote.clone())),
    );
    let collector = Collector::new(
        stream.clone(),
        dispatcher,
        CheckpointStore::new(checkpoint_path),
    )
    .unwrap();
    Harness {
        stream,
        local,
        remote,
        collector,
    }
}

#[test]
fn checkpoint_tracks_max_seen_despite_failures() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(&dir.path().join("sysmon.checkpoint"));

    // (new ids, local fails, remote fails)
    let cycles: [(Vec<u64>, bool, bool); 5] = [
        ((1..=3).collect(), false, false),
        ((4..=6).collect(), false, true),
        ((7..=8).collect(), true, false),
        (vec![], false, false),
        ((9..=12).collect(), true, true),
    ];

    let mut max_seen = 0;
    for (ids, local_fails, remote_fails) in cycles {
        h.local.set_failing(local_fails);
        h.remote.set_failing(remote_fails);
        if let Some(&m) = ids.iter().max() {
            max_seen = m;
        }
        h.stream.append(ids);

        let report = h.collector.run_cycle();
        assert_eq!(report.checkpoint_after, max_seen);
        assert!(report.checkpoint_after >= report.checkpoint_before);
        if remote_fails && report.batch_size > 0 {
            assert!(matches!(report.remote, SinkStatus::Failed(_)));
        }
    }

    assert_eq!(h.collector.checkpoint(), 12);

    // failed batches are never resent
    let remote_ids: Vec<u64> = h.remote.records().iter().map(|r| r.record_id).collect();
    assert_eq!(remote_ids, vec![1, 2, 3, 7, 8]);
    let local_ids: Vec<u64> = h.local.records().iter().map(|r| r.record_id).collect();
    assert_eq!(local_ids, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn restart_resumes_from_persisted_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sysmon.checkpoint");

    let mut first = harness(&path);
    first.stream.append(1..=5);
    first.collector.run_cycle();
    assert_eq!(CheckpointStore::new(&path).load().unwrap(), 5);

    // new process sees the whole stream again plus two new records
    let mut second = harness(&path);
    assert_eq!(second.collector.checkpoint(), 5);
    second.stream.append(1..=7);

    let report = second.collector.run_cycle();
    assert_eq!(report.records_read, 7);
    assert_eq!(report.batch_size, 2);
    let delivered: Vec<u64> = second.remote.records().iter().map(|r| r.record_id).collect();
    assert_eq!(delivered, vec![6, 7]);
}

#[test]
fn corrupt_checkpoint_refuses_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sysmon.checkpoint");
    std::fs::write(&path, "not-a-number").unwrap();

    let result = Collector::new(
        GrowingStream::default(),
        Dispatcher::new(Box::new(MemorySink::new()), Box::new(MemorySink::new())),
        CheckpointStore::new(&path),
    );
    assert!(result.is_err());
}

#[test]
fn local_store_sink_accumulates_across_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EventStore::open(&dir.path().join("collector.db")).unwrap());
    let remote = Arc::new(MemorySink::new());
    remote.set_failing(true);

    let stream = GrowingStream::default();
    let mut collector = Collector::new(
        stream.clone(),
        Dispatcher::new(
            Box::new(LocalStoreSink::new(store.clone(), "sysmon", 200)),
            Box::new(SharedSink(remote)),
        ),
        CheckpointStore::new(dir.path().join("sysmon.checkpoint")),
    )
    .unwrap();

    stream.append(1..=3);
    assert_eq!(collector.run_cycle().local, SinkStatus::Delivered(3));
    stream.append(4..=4);
    assert_eq!(collector.run_cycle().local, SinkStatus::Delivered(1));
    collector.run_cycle();

    assert_eq!(store.count().unwrap(), 4);
    let newest = &store.recent(1).unwrap()[0];
    assert_eq!(newest.summary, "Sysmon event 1: image-4.exe");
    assert_eq!(newest.meta["record_id"], 4);
}
