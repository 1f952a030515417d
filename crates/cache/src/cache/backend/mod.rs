//! Storage backends behind a single cache contract
//!
//! A backend owns its entries and answers get / set / delete / clear /
//! stats. Implementations must tolerate concurrent callers on their own:
//! the memoizer's per-function lock protects compute-then-store, not the
//! storage structure.
//!
//! No method on [`CacheBackend`] returns an error. Failures are logged,
//! counted in [`BackendStats::errors`], and reported as a miss or `false`.

use std::sync::Arc;

use super::entry::CacheEntry;
use super::key::CacheKey;
use super::stats::BackendStats;

pub mod disabled;
pub mod hybrid;
pub mod memory;
pub mod remote;

pub use disabled::DisabledBackend;
pub use hybrid::HybridBackend;
pub use memory::MemoryBackend;
pub use remote::{RedisStore, RemoteBackend, RemoteStore};

/// Storage strategy used by the cache context and the memoizer
pub trait CacheBackend: Send + Sync {
    /// Short backend name used in logs and statistics
    fn name(&self) -> &'static str;

    /// Return the entry if present and unexpired
    ///
    /// Expired entries found here are removed and counted as a miss.
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Store `entry` under `key`, replacing any previous entry as a whole
    fn set(&self, key: &CacheKey, entry: CacheEntry) -> bool;

    /// Remove `key`; `true` if something was removed
    fn delete(&self, key: &CacheKey) -> bool;

    /// Remove every entry owned by this backend
    fn clear(&self) -> bool;

    /// Counter snapshot
    fn stats(&self) -> BackendStats;
}

impl<T: CacheBackend + ?Sized> CacheBackend for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        (**self).get(key)
    }

    fn set(&self, key: &CacheKey, entry: CacheEntry) -> bool {
        (**self).set(key, entry)
    }

    fn delete(&self, key: &CacheKey) -> bool {
        (**self).delete(key)
    }

    fn clear(&self) -> bool {
        (**self).clear()
    }

    fn stats(&self) -> BackendStats {
        (**self).stats()
    }
}
