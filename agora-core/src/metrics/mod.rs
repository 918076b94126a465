//! Metrics collection for observability
//!
//! Counters go through the `metrics` facade so any installed recorder picks them
//! up; [`StorageStats`] keeps an in-process copy for tests and status reports.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

mod collector;

pub use collector::{StatsSnapshot, StorageStats};

/// Initialize metrics with descriptions
pub fn init_metrics() {
    // Storage engine
    describe_counter!("storage.add.accepted", "Protected entries added");
    describe_counter!("storage.add.duplicate", "Idempotent replays of known entries");
    describe_counter!("storage.remove.accepted", "Protected entries removed by their owner");
    describe_counter!("storage.refresh.accepted", "Protected entries refreshed");
    describe_counter!("storage.persistable.added", "Persistable payloads added");
    describe_counter!("storage.persistable.duplicate", "Persistable payloads already present");
    describe_counter!("storage.rejected", "Rejected operations, labelled by op and reason");
    describe_counter!("storage.unknown_owner", "Remove or refresh for a key we don't hold");
    describe_counter!("storage.expired", "Entries purged by the expiry sweeper");
    describe_histogram!("storage.sweep.duration_ms", "Expiry sweep duration in milliseconds");

    // Store services
    describe_counter!("store.persist.failed", "Snapshot writes that failed and will be retried");
    describe_counter!("store.snapshot.corrupt", "Snapshots quarantined on load");

    // Gossip
    describe_counter!("gossip.inbound.received", "Inbound frames received");
    describe_counter!("gossip.inbound.invalid", "Inbound frames that failed to decode");
    describe_counter!("gossip.broadcast.sent", "Frames queued to peers");
    describe_counter!("gossip.broadcast.skipped", "Peers skipped during broadcast, labelled by reason");
    describe_gauge!("gossip.peers.connected", "Number of connected peers");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a gauge metric
pub fn record_gauge(name: &'static str, value: f64) {
    gauge!(name).set(value);
}

/// Record a histogram metric
pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self { name, start: Instant::now() }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) {
        let duration = self.start.elapsed();
        record_histogram(self.name, duration.as_secs_f64() * 1000.0);
    }
}
