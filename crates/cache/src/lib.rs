//! Multi-tier memoization cache.
//!
//! Avoids repeating expensive computations by caching their results per
//! argument fingerprint across a bounded in-process tier, an optional
//! shared remote tier, their hybrid composition, and a disk-durable store
//! that survives restarts. Memoized wrappers guarantee that concurrent
//! misses for one key run the computation once.
//!
//! # Getting Started
//!
//! ```
//! use std::convert::Infallible;
//! use std::time::Duration;
//!
//! use memotier_cache::{CacheContext, CacheSettings};
//!
//! let cache = CacheContext::new(CacheSettings::memory(1000, Duration::from_secs(300)))?;
//!
//! let define = cache.memoize_sync("define", |term: String| {
//!     Ok::<_, Infallible>(format!("definition of {term}"))
//! });
//! assert_eq!(define.call("lemma".into()).ok(), Some("definition of lemma".to_string()));
//!
//! cache.set_cached("greeting", "hello", None);
//! assert_eq!(cache.get_cached_as::<String>("greeting").as_deref(), Some("hello"));
//! # Ok::<(), memotier_cache::CacheError>(())
//! ```
//!
//! # Failure Model
//!
//! Cache failures never fail a caller. Backends log and count them, then
//! answer as a cold cache would. Only errors returned by a memoized
//! computation itself reach the caller.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;

// Testing utilities
// ---------------------------------------------------------------
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use cache::{
    BackendStats, CacheBackend, CacheEntry, CacheHealth, CacheHealthReport, CacheKey,
    KeyBuilder, MemoStats, PersistentCacheManager, ThreadSafeMemoizer,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{BackendKind, CacheSettings};
pub use context::CacheContext;
pub use error::{CacheError, CacheResult, ErrorSeverity};
