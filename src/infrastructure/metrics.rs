//! Metrics collection for service monitoring
//!
//! Lock-free counters using relaxed atomics, updated by handlers and
//! exported via `/metrics`.

use crate::stores::Store;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Per-store counter pair
#[derive(Default)]
struct StoreCounters {
    write_failures: AtomicU64,
    read_failures: AtomicU64,
}

/// Service metrics collector
pub struct MetricsCollector {
    /// Requests written to both stores
    requests_stored: AtomicU64,
    /// Read-all calls that returned a partial view
    partial_reads: AtomicU64,
    /// Read-all calls served
    reads: AtomicU64,
    store_a: StoreCounters,
    store_b: StoreCounters,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Per-store section of a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub write_failures: u64,
    pub read_failures: u64,
}

/// Metrics snapshot for API export
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub requests_stored: u64,
    pub reads: u64,
    pub partial_reads: u64,
    pub store_a: StoreSnapshot,
    pub store_b: StoreSnapshot,
    pub reports_dropped: u64,
    pub store_rate: f64, // stored requests per second
    pub uptime_seconds: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            requests_stored: AtomicU64::new(0),
            partial_reads: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            store_a: StoreCounters::default(),
            store_b: StoreCounters::default(),
            start_time: Instant::now(),
        }
    }

    fn store(&self, store: Store) -> &StoreCounters {
        match store {
            Store::A => &self.store_a,
            Store::B => &self.store_b,
        }
    }

    #[inline]
    pub fn record_stored(&self) {
        self.requests_stored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_write_failure(&self, store: Store) {
        self.store(store).write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one read-all; `failures` lists the store of every failed shard read
    pub fn record_read(&self, failures: impl IntoIterator<Item = Store>) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let mut partial = false;
        for store in failures {
            partial = true;
            self.store(store).read_failures.fetch_add(1, Ordering::Relaxed);
        }
        if partial {
            self.partial_reads.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current snapshot; reporter drops are owned by the reporter and passed in
    pub fn snapshot(&self, reports_dropped: u64) -> MetricsSnapshot {
        let stored = self.requests_stored.load(Ordering::Relaxed);
        let uptime = self.start_time.elapsed().as_secs();
        let rate = if uptime > 0 {
            stored as f64 / uptime as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            requests_stored: stored,
            reads: self.reads.load(Ordering::Relaxed),
            partial_reads: self.partial_reads.load(Ordering::Relaxed),
            store_a: snapshot_store(&self.store_a),
            store_b: snapshot_store(&self.store_b),
            reports_dropped,
            store_rate: rate,
            uptime_seconds: uptime,
        }
    }
}

fn snapshot_store(counters: &StoreCounters) -> StoreSnapshot {
    StoreSnapshot {
        write_failures: counters.write_failures.load(Ordering::Relaxed),
        read_failures: counters.read_failures.load(Ordering::Relaxed),
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
