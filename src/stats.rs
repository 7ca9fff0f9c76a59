//! Plain atomic counters (spec.md §10.5 in SPEC_FULL.md): no Prometheus/axum
//! exporter is carried since the metrics surface is explicitly out of scope,
//! but the counters themselves are the ambient observability every command
//! path updates, mirroring the shape of the teacher's `core::state::Stats`.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    pub total_commands: AtomicU64,
    pub total_connections: AtomicU64,
    pub expired_keys: AtomicU64,
    pub evicted_keys: AtomicU64,
    pub keyspace_hits: AtomicU64,
    pub keyspace_misses: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_commands(&self) {
        self.total_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_expired(&self, n: u64) {
        self.expired_keys.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_evicted(&self, n: u64) {
        self.evicted_keys.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_hit(&self) {
        self.keyspace_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_miss(&self) {
        self.keyspace_misses.fetch_add(1, Ordering::Relaxed);
    }
}
