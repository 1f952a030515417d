//! Bounded in-process backend with LRU eviction
//!
//! Entries live in a `HashMap` behind a `parking_lot::RwLock`. Reads take
//! the write lock because a hit refreshes the entry's access metadata.
//! When the map is full and a new key arrives, the entry with the oldest
//! `last_accessed_at` is evicted; equal timestamps fall back to the access
//! sequence, which for never-read entries is insertion order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::CacheBackend;
use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::cache::stats::{BackendStats, StatsCollector};
use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, CacheResult};

const BACKEND: &str = "memory";

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    sequence: u64,
}

#[derive(Debug, Default)]
struct MemoryStorage {
    slots: HashMap<CacheKey, Slot>,
    next_sequence: u64,
}

impl MemoryStorage {
    fn bump(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Fails with `CapacityExceeded` when inserting `key` needs a free slot
    fn reserve(&self, key: &CacheKey, capacity: usize) -> CacheResult<()> {
        if self.slots.len() >= capacity && !self.slots.contains_key(key) {
            return Err(CacheError::CapacityExceeded { capacity });
        }
        Ok(())
    }

    fn lru_key(&self) -> Option<CacheKey> {
        self.slots
            .iter()
            .min_by_key(|(_, slot)| (slot.entry.last_accessed_at, slot.sequence))
            .map(|(key, _)| key.clone())
    }
}

/// In-process, size-bounded cache tier
///
/// Clones share storage and counters.
///
/// # Example
/// ```
/// use std::time::Duration;
///
/// use memotier_cache::cache::{CacheBackend, CacheEntry, CacheKey, MemoryBackend};
/// use serde_json::json;
///
/// let backend = MemoryBackend::new(100);
/// let key = CacheKey::from("greeting");
/// backend.set(&key, CacheEntry::new(json!("hello"), Duration::from_secs(60)));
/// assert_eq!(backend.get(&key).map(|e| e.value), Some(json!("hello")));
/// ```
#[derive(Debug)]
pub struct MemoryBackend<C = SystemClock>
where
    C: Clock + Clone,
{
    storage: Arc<RwLock<MemoryStorage>>,
    max_entries: usize,
    stats: StatsCollector,
    clock: C,
}

impl MemoryBackend<SystemClock> {
    /// Create a backend holding at most `max_entries` entries
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, SystemClock)
    }
}

impl<C: Clock + Clone> MemoryBackend<C> {
    /// Create a backend with a custom clock (useful for testing)
    pub fn with_clock(max_entries: usize, clock: C) -> Self {
        Self {
            storage: Arc::new(RwLock::new(MemoryStorage::default())),
            max_entries: max_entries.max(1),
            stats: StatsCollector::new(),
            clock,
        }
    }

    /// Configured capacity
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Current number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.storage.read().slots.len()
    }

    /// Check if the backend is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` holds an unexpired entry; does not touch it
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = self.clock.utc_now();
        self.storage.read().slots.get(key).is_some_and(|slot| !slot.entry.is_expired_at(now))
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.utc_now();
        let mut storage = self.storage.write();
        let before = storage.slots.len();
        storage.slots.retain(|_, slot| !slot.entry.is_expired_at(now));
        let removed = before - storage.slots.len();
        for _ in 0..removed {
            self.stats.record_expiration();
        }
        if removed > 0 {
            debug!(backend = BACKEND, removed, "Swept expired cache entries");
        }
        removed
    }

    /// Best-effort payload footprint; unserializable values count as zero
    pub fn estimated_size_bytes(&self) -> u64 {
        self.storage.read().slots.values().map(|slot| slot.entry.estimated_size() as u64).sum()
    }

    fn evict_one(&self, storage: &mut MemoryStorage) {
        if let Some(victim) = storage.lru_key() {
            storage.slots.remove(&victim);
            self.stats.record_eviction();
            trace!(backend = BACKEND, key = %victim, "Evicted least recently used entry");
        }
    }
}

impl<C: Clock + Clone> CacheBackend for MemoryBackend<C> {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = self.clock.utc_now();
        let mut storage = self.storage.write();

        let expired = match storage.slots.get(key) {
            None => {
                self.stats.record_miss();
                return None;
            }
            Some(slot) => slot.entry.is_expired_at(now),
        };

        if expired {
            storage.slots.remove(key);
            self.stats.record_expiration();
            self.stats.record_miss();
            trace!(backend = BACKEND, key = %key, "Dropped expired entry on read");
            return None;
        }

        let sequence = storage.bump();
        let slot = storage.slots.get_mut(key)?;
        slot.entry.touch_at(now);
        slot.sequence = sequence;
        self.stats.record_hit();
        Some(slot.entry.clone())
    }

    fn set(&self, key: &CacheKey, entry: CacheEntry) -> bool {
        let mut storage = self.storage.write();

        while let Err(CacheError::CapacityExceeded { .. }) =
            storage.reserve(key, self.max_entries)
        {
            let before = storage.slots.len();
            self.evict_one(&mut storage);
            if storage.slots.len() == before {
                break;
            }
        }

        let sequence = storage.bump();
        storage.slots.insert(key.clone(), Slot { entry, sequence });
        self.stats.record_set();
        true
    }

    fn delete(&self, key: &CacheKey) -> bool {
        let removed = self.storage.write().slots.remove(key).is_some();
        if removed {
            self.stats.record_delete();
        }
        removed
    }

    fn clear(&self) -> bool {
        let mut storage = self.storage.write();
        let removed = storage.slots.len();
        storage.slots.clear();
        self.stats.record_deletes(removed as u64);
        debug!(backend = BACKEND, removed, "Cleared cache");
        true
    }

    fn stats(&self) -> BackendStats {
        let mut stats = self.stats.snapshot(BACKEND);
        stats.entries = self.len();
        stats.max_entries = Some(self.max_entries);
        stats.size_bytes = Some(self.estimated_size_bytes());
        stats
    }
}

impl<C: Clock + Clone> Clone for MemoryBackend<C> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            max_entries: self.max_entries,
            stats: self.stats.clone(),
            clock: self.clock.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for cache::backend::memory.
    use std::thread;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::clock::MockClock;

    fn entry(clock: &MockClock, value: serde_json::Value, ttl_secs: u64) -> CacheEntry {
        CacheEntry::new_at(value, Duration::from_secs(ttl_secs), clock.utc_now())
    }

    /// Validates `MemoryBackend::set` behavior for the lru eviction
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms `"b"` is evicted after `"a"` is refreshed and `"c"` added.
    /// - Confirms `"a"` and `"c"` remain retrievable.
    /// - Confirms exactly one eviction was counted.
    #[test]
    fn test_lru_eviction_refreshed_entry_survives() {
        // Frozen clock: recency must come from the access sequence alone
        let clock = MockClock::new();
        let backend = MemoryBackend::with_clock(2, clock.clone());

        backend.set(&"a".into(), entry(&clock, json!(1), 60));
        backend.set(&"b".into(), entry(&clock, json!(2), 60));
        assert!(backend.get(&"a".into()).is_some());
        backend.set(&"c".into(), entry(&clock, json!(3), 60));

        assert_eq!(backend.get(&"a".into()).map(|e| e.value), Some(json!(1)));
        assert_eq!(backend.get(&"c".into()).map(|e| e.value), Some(json!(3)));
        assert!(backend.get(&"b".into()).is_none());
        assert_eq!(backend.stats().evictions, 1);
    }

    /// Validates `MemoryBackend::set` behavior for the timestamp ordering
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the entry with the oldest `last_accessed_at` is evicted.
    #[test]
    fn test_eviction_prefers_oldest_access_time() {
        let clock = MockClock::new();
        let backend = MemoryBackend::with_clock(2, clock.clone());

        backend.set(&"old".into(), entry(&clock, json!(1), 600));
        clock.advance_secs(1);
        backend.set(&"new".into(), entry(&clock, json!(2), 600));
        clock.advance_secs(1);
        backend.set(&"third".into(), entry(&clock, json!(3), 600));

        assert!(!backend.contains(&"old".into()));
        assert!(backend.contains(&"new".into()));
        assert!(backend.contains(&"third".into()));
    }

    /// Validates `MemoryBackend::set` behavior for the overwrite at
    /// capacity scenario.
    ///
    /// Assertions:
    /// - Confirms replacing an existing key never evicts.
    #[test]
    fn test_overwrite_existing_key_does_not_evict() {
        let backend = MemoryBackend::new(2);
        backend.set(&"a".into(), CacheEntry::new(json!(1), Duration::from_secs(60)));
        backend.set(&"b".into(), CacheEntry::new(json!(2), Duration::from_secs(60)));
        backend.set(&"a".into(), CacheEntry::new(json!(10), Duration::from_secs(60)));

        assert_eq!(backend.len(), 2);
        assert_eq!(backend.stats().evictions, 0);
        assert_eq!(backend.get(&"a".into()).map(|e| e.value), Some(json!(10)));
    }

    /// Validates `MemoryBackend::get` behavior for the expired read
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms an expired entry reads as absent.
    /// - Confirms it is removed and counted as a miss and an expiration.
    #[test]
    fn test_expired_entry_removed_on_read() {
        let clock = MockClock::new();
        let backend = MemoryBackend::with_clock(10, clock.clone());
        backend.set(&"k".into(), entry(&clock, json!("v"), 5));

        clock.advance_secs(6);

        assert!(backend.get(&"k".into()).is_none());
        assert_eq!(backend.len(), 0);
        let stats = backend.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    /// Validates `MemoryBackend::get` behavior for the touch on hit
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms each hit bumps `access_count`.
    #[test]
    fn test_hits_touch_entry() {
        let backend = MemoryBackend::new(4);
        backend.set(&"k".into(), CacheEntry::new(json!(1), Duration::from_secs(60)));

        backend.get(&"k".into());
        let second = backend.get(&"k".into()).unwrap();

        assert_eq!(second.access_count, 2);
        assert_eq!(backend.stats().hits, 2);
    }

    /// Validates `MemoryBackend::cleanup_expired` behavior for the sweep
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms only expired entries are removed.
    #[test]
    fn test_cleanup_expired_sweeps() {
        let clock = MockClock::new();
        let backend = MemoryBackend::with_clock(10, clock.clone());
        backend.set(&"short".into(), entry(&clock, json!(1), 1));
        backend.set(&"long".into(), entry(&clock, json!(2), 100));

        clock.advance_secs(2);

        assert_eq!(backend.cleanup_expired(), 1);
        assert!(backend.contains(&"long".into()));
        assert_eq!(backend.stats().expirations, 1);
    }

    /// Validates `MemoryBackend::delete` and `clear` behavior for the
    /// counters scenario.
    ///
    /// Assertions:
    /// - Confirms deletes count only when something was removed.
    /// - Confirms clear empties the backend.
    #[test]
    fn test_delete_and_clear() {
        let backend = MemoryBackend::new(10);
        backend.set(&"a".into(), CacheEntry::new(json!(1), Duration::from_secs(60)));
        backend.set(&"b".into(), CacheEntry::new(json!(2), Duration::from_secs(60)));

        assert!(backend.delete(&"a".into()));
        assert!(!backend.delete(&"a".into()));
        assert_eq!(backend.stats().deletes, 1);

        assert!(backend.clear());
        assert!(backend.is_empty());
    }

    /// Validates `MemoryBackend::stats` behavior for the size estimate
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the size estimate reflects the JSON payload.
    #[test]
    fn test_size_estimate() {
        let backend = MemoryBackend::new(10);
        backend.set(&"a".into(), CacheEntry::new(json!("abcd"), Duration::from_secs(60)));
        // "abcd" plus quotes
        assert_eq!(backend.stats().size_bytes, Some(6));
    }

    /// Validates `Arc::new` behavior for the concurrent access scenario.
    ///
    /// Assertions:
    /// - Confirms the backend never exceeds capacity under parallel writes.
    #[test]
    fn test_concurrent_writes_respect_capacity() {
        let backend = MemoryBackend::new(50);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let backend = backend.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        let key = CacheKey::new(format!("{t}-{i}"));
                        backend.set(&key, CacheEntry::new(json!(i), Duration::from_secs(60)));
                        backend.get(&key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(backend.len(), 50);
        assert_eq!(backend.stats().sets, 800);
    }
}
