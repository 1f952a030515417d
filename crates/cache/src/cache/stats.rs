//! Backend statistics and counters
//!
//! Each backend owns a [`StatsCollector`] of relaxed atomics and hands out
//! [`BackendStats`] snapshots. Counters never block the data path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Point-in-time counters for one backend
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackendStats {
    /// Backend name (`memory`, `remote`, `hybrid`, `disabled`)
    pub backend: &'static str,

    /// Current number of entries, when the backend can tell
    pub entries: usize,

    /// Maximum allowed entries (None = unbounded or unknown)
    pub max_entries: Option<usize>,

    /// Reads answered with a valid entry
    pub hits: u64,

    /// Reads that found nothing, an expired entry, or failed
    pub misses: u64,

    /// Successful writes
    pub sets: u64,

    /// Successful explicit deletions
    pub deletes: u64,

    /// Entries removed to make room
    pub evictions: u64,

    /// Entries removed because their TTL elapsed
    pub expirations: u64,

    /// Failures caught at the backend boundary
    pub errors: u64,

    /// Best-effort payload footprint in bytes
    pub size_bytes: Option<u64>,
}

impl BackendStats {
    /// Calculate hit rate (hits / total accesses)
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate miss rate (misses / total accesses)
    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    /// Total number of read operations (hits + misses)
    pub fn total_accesses(&self) -> u64 {
        self.hits + self.misses
    }

    /// Calculate fill percentage (entries / max_entries)
    pub fn fill_percentage(&self) -> Option<f64> {
        self.max_entries.map(|max| if max == 0 { 0.0 } else { self.entries as f64 / max as f64 })
    }

    /// Errors relative to all counted operations
    pub fn error_rate(&self) -> f64 {
        let ops = self.total_accesses() + self.sets + self.deletes;
        if ops == 0 {
            0.0
        } else {
            self.errors as f64 / ops as f64
        }
    }
}

/// Lock-free counter set shared by a backend and its clones
#[derive(Debug, Clone, Default)]
pub(crate) struct StatsCollector {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    errors: AtomicU64,
}

impl StatsCollector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_set(&self) {
        self.inner.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.inner.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deletes(&self, count: u64) {
        self.inner.deletes.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.inner.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expiration(&self) {
        self.inner.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Counter snapshot; callers fill in entry counts and sizes
    pub(crate) fn snapshot(&self, backend: &'static str) -> BackendStats {
        let c = &self.inner;
        BackendStats {
            backend,
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            sets: c.sets.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}
