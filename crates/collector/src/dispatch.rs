//! Dual-sink delivery of one batch
//!
//! Local durable write first, then the remote sink. The two attempts are
//! independent: a failure on one side never skips the other. Nothing is
//! retried; the caller advances the checkpoint whatever the outcome.

use crate::sink::{EventSink, SinkError};
use sphere_core::EventRecord;

/// Result of both delivery attempts for a single batch
#[derive(Debug)]
pub struct DispatchOutcome {
    pub local: Result<usize, SinkError>,
    pub remote: Result<usize, SinkError>,
}

impl DispatchOutcome {
    pub fn fully_delivered(&self) -> bool {
        self.local.is_ok() && self.remote.is_ok()
    }
}

pub struct Dispatcher {
    local: Box<dyn EventSink>,
    remote: Box<dyn EventSink>,
}

impl Dispatcher {
    pub fn new(local: Box<dyn EventSink>, remote: Box<dyn EventSink>) -> Self {
        Self { local, remote }
    }

    pub fn dispatch(&self, batch: &[EventRecord]) -> DispatchOutcome {
        let local = self.local.deliver(batch);
        if let Err(ref e) = local {
            tracing::error!(sink = self.local.name(), batch = batch.len(), error = %e, "local delivery failed");
        }

        let remote = self.remote.deliver(batch);
        if let Err(ref e) = remote {
            tracing::warn!(sink = self.remote.name(), batch = batch.len(), error = %e, "remote delivery failed; batch will not be resent");
        }

        DispatchOutcome { local, remote }
    }
}
