//! Two-tier composition: fast local tier in front of a shared tier
//!
//! Reads go local first, then shared; a shared hit is backfilled into the
//! local tier with its original `created_at`, so the local copy never
//! outlives the shared one. Writes favor availability (either tier
//! succeeding is success) while `clear` requires both tiers, since a
//! partial clear would leave stale data behind an invalidation.

use tracing::trace;

use super::memory::MemoryBackend;
use super::remote::RemoteBackend;
use super::CacheBackend;
use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::cache::stats::{BackendStats, StatsCollector};

const BACKEND: &str = "hybrid";

/// Local + shared cache tiers behind one [`CacheBackend`]
///
/// Owns no entries of its own; each tier owns and synchronizes its storage.
#[derive(Debug)]
pub struct HybridBackend<L = MemoryBackend, R = RemoteBackend>
where
    L: CacheBackend,
    R: CacheBackend,
{
    local: L,
    shared: R,
    stats: StatsCollector,
}

impl<L: CacheBackend, R: CacheBackend> HybridBackend<L, R> {
    /// Compose `local` (consulted first) with `shared`
    pub fn new(local: L, shared: R) -> Self {
        Self { local, shared, stats: StatsCollector::new() }
    }

    /// Fast, volatile tier
    pub fn local(&self) -> &L {
        &self.local
    }

    /// Slower, shared tier
    pub fn shared(&self) -> &R {
        &self.shared
    }
}

impl<L: CacheBackend, R: CacheBackend> CacheBackend for HybridBackend<L, R> {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(entry) = self.local.get(key) {
            self.stats.record_hit();
            return Some(entry);
        }

        match self.shared.get(key) {
            Some(entry) => {
                if self.local.set(key, entry.clone()) {
                    trace!(backend = BACKEND, key = %key, "Backfilled local tier");
                }
                self.stats.record_hit();
                Some(entry)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    fn set(&self, key: &CacheKey, entry: CacheEntry) -> bool {
        let stored_local = self.local.set(key, entry.clone());
        let stored_shared = self.shared.set(key, entry);
        let stored = stored_local || stored_shared;
        if stored {
            self.stats.record_set();
        }
        stored
    }

    fn delete(&self, key: &CacheKey) -> bool {
        let removed_local = self.local.delete(key);
        let removed_shared = self.shared.delete(key);
        let removed = removed_local || removed_shared;
        if removed {
            self.stats.record_delete();
        }
        removed
    }

    fn clear(&self) -> bool {
        // Both tiers are always attempted
        let cleared_local = self.local.clear();
        let cleared_shared = self.shared.clear();
        cleared_local && cleared_shared
    }

    fn stats(&self) -> BackendStats {
        let local = self.local.stats();
        let shared = self.shared.stats();
        let mut stats = self.stats.snapshot(BACKEND);
        stats.entries = local.entries.max(shared.entries);
        stats.max_entries = local.max_entries;
        stats.evictions = local.evictions + shared.evictions;
        stats.expirations = local.expirations + shared.expirations;
        stats.errors = local.errors + shared.errors;
        stats.size_bytes = local.size_bytes;
        stats
    }
}
