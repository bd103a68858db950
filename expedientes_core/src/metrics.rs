//! Ingestion Metrics
//! =================
//!
//! Observability hook for the normalizer. Data-quality drops never surface
//! as errors, so this is the only place they become visible:
//! - **Dropped messages**, by [`DropReason`]
//! - **Discarded entries**, amounts and stages separately
//! - **Empty records**: kept, but carrying no nested data
//! - **Append failures** reported by the sink

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::model::NormalizedRecord;
use crate::normalizer::{DiscardedEntries, DropReason, NormalizeOutcome};

/// Receives every normalization outcome. Implementations must tolerate
/// concurrent calls from parallel workers.
pub trait IngestObserver: Send + Sync {
    fn on_normalized(&self, record: &NormalizedRecord, discarded: DiscardedEntries);

    fn on_dropped(&self, reason: DropReason);

    fn on_append_failed(&self, _record: &NormalizedRecord, _error: &str) {}

    /// Dispatches an outcome to the matching callback.
    fn observe(&self, outcome: &NormalizeOutcome) {
        match outcome {
            NormalizeOutcome::Normalized { record, discarded } => self.on_normalized(record, *discarded),
            NormalizeOutcome::Dropped(reason) => self.on_dropped(*reason),
        }
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl IngestObserver for NoopObserver {
    fn on_normalized(&self, _record: &NormalizedRecord, _discarded: DiscardedEntries) {}

    fn on_dropped(&self, _reason: DropReason) {}
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub normalized: u64,
    pub empty_records: u64,
    pub dropped_invalid_utf8: u64,
    pub dropped_malformed_json: u64,
    pub dropped_not_an_object: u64,
    pub dropped_missing_ref: u64,
    pub dropped_invalid_ref: u64,
    pub amounts_discarded: u64,
    pub stages_discarded: u64,
    pub append_failures: u64,
}

impl IngestSnapshot {
    pub fn dropped(&self) -> u64 {
        self.dropped_invalid_utf8
            + self.dropped_malformed_json
            + self.dropped_not_an_object
            + self.dropped_missing_ref
            + self.dropped_invalid_ref
    }

    /// Messages seen, kept or dropped.
    pub fn received(&self) -> u64 {
        self.normalized + self.dropped()
    }

    pub fn entries_discarded(&self) -> u64 {
        self.amounts_discarded + self.stages_discarded
    }
}

/// Lock-free counters, shareable behind an `Arc`.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    normalized: AtomicU64,
    empty_records: AtomicU64,
    dropped_invalid_utf8: AtomicU64,
    dropped_malformed_json: AtomicU64,
    dropped_not_an_object: AtomicU64,
    dropped_missing_ref: AtomicU64,
    dropped_invalid_ref: AtomicU64,
    amounts_discarded: AtomicU64,
    stages_discarded: AtomicU64,
    append_failures: AtomicU64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            normalized: self.normalized.load(Ordering::Relaxed),
            empty_records: self.empty_records.load(Ordering::Relaxed),
            dropped_invalid_utf8: self.dropped_invalid_utf8.load(Ordering::Relaxed),
            dropped_malformed_json: self.dropped_malformed_json.load(Ordering::Relaxed),
            dropped_not_an_object: self.dropped_not_an_object.load(Ordering::Relaxed),
            dropped_missing_ref: self.dropped_missing_ref.load(Ordering::Relaxed),
            dropped_invalid_ref: self.dropped_invalid_ref.load(Ordering::Relaxed),
            amounts_discarded: self.amounts_discarded.load(Ordering::Relaxed),
            stages_discarded: self.stages_discarded.load(Ordering::Relaxed),
            append_failures: self.append_failures.load(Ordering::Relaxed),
        }
    }

    fn drop_counter(&self, reason: DropReason) -> &AtomicU64 {
        match reason {
            DropReason::InvalidUtf8 => &self.dropped_invalid_utf8,
            DropReason::MalformedJson => &self.dropped_malformed_json,
            DropReason::NotAnObject => &self.dropped_not_an_object,
            DropReason::MissingRef => &self.dropped_missing_ref,
            DropReason::InvalidRef => &self.dropped_invalid_ref,
        }
    }
}

impl IngestObserver for IngestMetrics {
    fn on_normalized(&self, record: &NormalizedRecord, discarded: DiscardedEntries) {
        self.normalized.fetch_add(1, Ordering::Relaxed);
        if record.is_empty() {
            self.empty_records.fetch_add(1, Ordering::Relaxed);
        }
        if discarded.total() > 0 {
            self.amounts_discarded.fetch_add(discarded.amounts as u64, Ordering::Relaxed);
            self.stages_discarded.fetch_add(discarded.stages as u64, Ordering::Relaxed);
            debug!(
                case = %record.case_ref,
                amounts = discarded.amounts,
                stages = discarded.stages,
                "discarded malformed entries"
            );
        }
    }

    fn on_dropped(&self, reason: DropReason) {
        self.drop_counter(reason).fetch_add(1, Ordering::Relaxed);
        debug!(%reason, "message dropped");
    }

    fn on_append_failed(&self, record: &NormalizedRecord, error: &str) {
        self.append_failures.fetch_add(1, Ordering::Relaxed);
        warn!(case = %record.case_ref, error, "append to staging table failed");
    }
}
