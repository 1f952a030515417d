//! Cache tiers, keys and memoization
//!
//! - [`entry`]: the unit every tier stores ([`CacheEntry`])
//! - [`key`]: deterministic key derivation ([`KeyBuilder`])
//! - [`backend`]: memory, remote, hybrid and disabled tiers behind
//!   [`CacheBackend`]
//! - [`memoize`]: stampede-safe wrappers ([`ThreadSafeMemoizer`])
//! - [`persistent`]: restart-surviving store ([`PersistentCacheManager`])
//! - [`stats`] and [`health`]: counters and diagnostics

pub mod backend;
pub mod entry;
pub mod health;
pub mod key;
pub mod memoize;
pub mod persistent;
pub mod stats;

pub use backend::{
    CacheBackend, DisabledBackend, HybridBackend, MemoryBackend, RedisStore, RemoteBackend,
    RemoteStore,
};
pub use entry::CacheEntry;
pub use health::{CacheHealth, CacheHealthReport};
pub use key::{CacheKey, KeyBuilder, MAX_KEY_LENGTH};
pub use memoize::{AsyncMemoizedFn, KeyFn, MemoStats, MemoizedFn, ThreadSafeMemoizer};
pub use persistent::{MetadataRecord, PersistentCacheManager, PersistentStats};
pub use stats::BackendStats;
