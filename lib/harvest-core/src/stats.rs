//! Submission statistics.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Cumulative submission counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct SubmissionStats {
    /// Samples rejected locally by the metric filter.
    pub filtered: u64,

    /// Samples the broker reported as filtered.
    pub broker_filtered: u64,

    /// Samples the broker reported as received.
    pub received: u64,

    /// Samples sent to the broker.
    pub sent: u64,

    /// Bytes sent to the broker, before compression.
    pub sent_bytes: u64,

    /// Bytes sent to the broker, as written on the wire.
    pub sent_bytes_wire: u64,
}

/// The outcome of a single successful submission.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SubmissionOutcome {
    /// Number of samples in the submitted batch.
    pub sent: u64,

    /// Number of samples the broker reported as received.
    pub received: u64,

    /// Number of samples the broker reported as filtered.
    pub broker_filtered: u64,

    /// Size of the serialized payload, in bytes.
    pub raw_bytes: u64,

    /// Size of the request body, in bytes, after any compression.
    pub wire_bytes: u64,
}

/// Submission statistics shared between concurrent collectors.
///
/// All updates happen under a single lock, since a submission updates several counters together and readers must never
/// observe a partial update.
#[derive(Clone, Debug, Default)]
pub struct SharedStats {
    inner: Arc<Mutex<SubmissionStats>>,
}

impl SharedStats {
    /// Creates a new `SharedStats` with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SubmissionStats> {
        // Every update is a plain counter addition that can't leave the stats half-written, so a poisoned lock is safe
        // to keep using.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `count` samples as filtered locally.
    pub fn add_filtered(&self, count: u64) {
        self.lock().filtered += count;
    }

    /// Records a successful submission.
    pub fn record_submission(&self, outcome: SubmissionOutcome) {
        let mut stats = self.lock();
        stats.sent += outcome.sent;
        stats.received += outcome.received;
        stats.broker_filtered += outcome.broker_filtered;
        stats.sent_bytes += outcome.raw_bytes;
        stats.sent_bytes_wire += outcome.wire_bytes;
    }

    /// Returns a copy of the current counters.
    pub fn snapshot(&self) -> SubmissionStats {
        *self.lock()
    }

    /// Resets all counters to zero, returning their values prior to the reset.
    pub fn reset(&self) -> SubmissionStats {
        std::mem::take(&mut *self.lock())
    }
}
