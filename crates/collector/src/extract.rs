//! Batch extraction: raw source read + checkpoint -> ordered batch of unseen records
//!
//! Sources may hand back records newest first (the event log is read
//! backwards). The batch is always ascending by `record_id` so sinks see
//! events in the order they happened.

use sphere_core::EventRecord;

/// Keep records with `record_id > checkpoint`, sorted ascending.
///
/// An empty result is not an error; it means nothing new arrived.
pub fn extract(raw_records: Vec<EventRecord>, checkpoint: u64) -> Vec<EventRecord> {
    let mut batch: Vec<EventRecord> = raw_records
        .into_iter()
        .filter(|r| r.record_id > checkpoint)
        .collect();
    batch.sort_by_key(|r| r.record_id);
    batch
}

/// Highest record id in a batch, if any
pub fn max_record_id(batch: &[EventRecord]) -> Option<u64> {
    batch.iter().map(|r| r.record_id).max()
}
