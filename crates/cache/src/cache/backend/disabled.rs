//! Always-miss backend used when caching is switched off

use super::CacheBackend;
use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::cache::stats::{BackendStats, StatsCollector};

const BACKEND: &str = "disabled";

/// Stores nothing; every read is a miss and every write is refused
#[derive(Debug, Clone, Default)]
pub struct DisabledBackend {
    stats: StatsCollector,
}

impl DisabledBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for DisabledBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn get(&self, _key: &CacheKey) -> Option<CacheEntry> {
        self.stats.record_miss();
        None
    }

    fn set(&self, _key: &CacheKey, _entry: CacheEntry) -> bool {
        false
    }

    fn delete(&self, _key: &CacheKey) -> bool {
        false
    }

    // Nothing to clear, so clearing always succeeds
    fn clear(&self) -> bool {
        true
    }

    fn stats(&self) -> BackendStats {
        self.stats.snapshot(BACKEND)
    }
}
