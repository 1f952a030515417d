//! Stampede-safe memoization over any [`CacheBackend`]
//!
//! [`ThreadSafeMemoizer`] wraps computations in one of two shapes chosen
//! at wiring time: [`MemoizedFn`] for blocking calls and
//! [`AsyncMemoizedFn`] for suspending ones. Both run the same protocol:
//!
//! 1. derive the key (namespace + arguments, or a caller key function)
//! 2. read the backend without locking; a valid entry is a hit
//! 3. otherwise record a provisional miss and take the wrapper's lock
//! 4. re-read under the lock; a value committed meanwhile turns the miss
//!    into a hit
//! 5. otherwise compute once, store with the wrapper's TTL, release
//!
//! For a given key the computation therefore runs at most once per miss
//! window, however many callers race. Locks are handed out per namespace
//! by the [`ThreadSafeMemoizer`] (and its clones), so every wrapper created
//! for one namespace shares a lock while unrelated functions never contend.
//! Blocking and suspending wrappers draw from separate registries; a sync
//! and an async wrapper of the same namespace do not exclude each other.
//!
//! A computation error is returned to the caller and nothing is cached;
//! the lock guard is dropped on the way out so the next caller retries.
//! Cache-layer problems (key encoding, value decoding, backend failures)
//! never fail a call; they degrade to computing without the cache.
//!
//! A caller that stops waiting (for example a `tokio::time::timeout`
//! around [`AsyncMemoizedFn::call`]) does not cancel the computation held
//! by another caller. Dropping the future that *holds* the lock does
//! cancel that computation and lets the next waiter take over.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use super::backend::CacheBackend;
use super::entry::CacheEntry;
use super::key::{CacheKey, KeyBuilder};
use crate::clock::{Clock, SystemClock};
use crate::error::CacheResult;
use crate::logging::log_backend_failure;

/// Key derivation used by a memoized function
pub type KeyFn<A> = Arc<dyn Fn(&A) -> CacheResult<CacheKey> + Send + Sync>;

type LockRegistry<L> = Arc<parking_lot::Mutex<HashMap<String, Arc<L>>>>;

/// Lock shared by every wrapper registered under `namespace`
fn namespace_lock<L: Default>(registry: &LockRegistry<L>, namespace: &str) -> Arc<L> {
    let mut locks = registry.lock();
    if let Some(lock) = locks.get(namespace) {
        return Arc::clone(lock);
    }
    let lock = Arc::new(L::default());
    locks.insert(namespace.to_string(), Arc::clone(&lock));
    lock
}

/// Per-wrapper call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoStats {
    /// Calls answered from the cache (fast path or double-check)
    pub hits: u64,
    /// Calls that had to compute
    pub misses: u64,
    /// Times the wrapped computation actually ran
    pub computations: u64,
    /// Computations that returned an error
    pub failures: u64,
}

impl MemoStats {
    /// Fraction of calls served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct MemoCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
}

impl MemoCounters {
    fn snapshot(&self) -> MemoStats {
        MemoStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// State shared by both wrapper shapes
struct MemoCore<A> {
    namespace: String,
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    key_fn: KeyFn<A>,
    counters: Arc<MemoCounters>,
}

impl<A> Clone for MemoCore<A> {
    fn clone(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            backend: Arc::clone(&self.backend),
            clock: Arc::clone(&self.clock),
            ttl: self.ttl,
            key_fn: Arc::clone(&self.key_fn),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<A> MemoCore<A> {
    fn key(&self, args: &A) -> Option<CacheKey> {
        match (self.key_fn)(args) {
            Ok(key) => Some(key),
            Err(err) => {
                log_backend_failure("key", &self.namespace, self.backend.name(), &err);
                None
            }
        }
    }

    /// Fast-path and double-check read
    fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let entry = self.backend.get(key)?;
        match serde_json::from_value(entry.value) {
            Ok(value) => Some(value),
            Err(err) => {
                log_backend_failure("decode", key.as_str(), self.backend.name(), &err.into());
                None
            }
        }
    }

    fn store<T: Serialize>(&self, key: &CacheKey, value: &T) {
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                log_backend_failure("encode", key.as_str(), self.backend.name(), &err.into());
                return;
            }
        };
        let entry = CacheEntry::new_at(encoded, self.ttl, self.clock.utc_now());
        if !self.backend.set(key, entry) {
            debug!(namespace = %self.namespace, key = %key, "Memoized result not stored");
        }
    }

    fn record_hit(&self) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_provisional_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Another caller committed the value while this one waited
    fn convert_miss_to_hit(&self) {
        self.counters.misses.fetch_sub(1, Ordering::Relaxed);
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_computation<T, E>(&self, result: &Result<T, E>) {
        self.counters.computations.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            debug!(namespace = %self.namespace, "Memoized computation failed; nothing cached");
        }
    }

    fn invalidate(&self, args: &A) -> bool {
        self.key(args).is_some_and(|key| self.backend.delete(&key))
    }
}

impl<A: 'static> MemoCore<A> {
    fn with_key_fn<K>(&mut self, key_fn: K)
    where
        K: Fn(&A) -> CacheKey + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(move |args: &A| Ok(key_fn(args)));
    }
}

/// Factory for memoized functions sharing one backend
///
/// # Example
/// ```
/// use std::convert::Infallible;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use memotier_cache::cache::{MemoryBackend, ThreadSafeMemoizer};
///
/// let backend = Arc::new(MemoryBackend::new(100));
/// let memoizer = ThreadSafeMemoizer::new(backend, Duration::from_secs(60));
/// let square = memoizer.memoize_sync("square", |n: u64| Ok::<_, Infallible>(n * n));
///
/// assert_eq!(square.call(12), Ok(144));
/// assert_eq!(square.call(12), Ok(144));
/// assert_eq!(square.stats().computations, 1);
/// ```
#[derive(Clone)]
pub struct ThreadSafeMemoizer {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    sync_locks: LockRegistry<parking_lot::Mutex<()>>,
    async_locks: LockRegistry<tokio::sync::Mutex<()>>,
}

impl fmt::Debug for ThreadSafeMemoizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeMemoizer")
            .field("backend", &self.backend.name())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl ThreadSafeMemoizer {
    /// Memoize into `backend`, storing results for `default_ttl`
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self::with_clock(backend, default_ttl, Arc::new(SystemClock))
    }

    /// Create a memoizer with a custom clock (useful for testing)
    pub fn with_clock(
        backend: Arc<dyn CacheBackend>,
        default_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            default_ttl,
            clock,
            sync_locks: Arc::default(),
            async_locks: Arc::default(),
        }
    }

    /// Backend every wrapper reads from and writes to
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// TTL given to wrappers that do not override it with `with_ttl`
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn core<A>(&self, namespace: String) -> MemoCore<A>
    where
        A: Serialize + 'static,
    {
        let key_namespace = namespace.clone();
        MemoCore {
            namespace,
            backend: Arc::clone(&self.backend),
            clock: Arc::clone(&self.clock),
            ttl: self.default_ttl,
            key_fn: Arc::new(move |args: &A| KeyBuilder::for_call(&key_namespace, args)),
            counters: Arc::new(MemoCounters::default()),
        }
    }

    /// Wrap a blocking computation
    ///
    /// `namespace` identifies the function: it prefixes every key, and
    /// every blocking wrapper created under the same namespace by this
    /// memoizer or its clones shares one lock.
    pub fn memoize_sync<A, T, E, F>(
        &self,
        namespace: impl Into<String>,
        func: F,
    ) -> MemoizedFn<A, T, E, F>
    where
        A: Serialize + 'static,
        T: Serialize + DeserializeOwned,
        F: Fn(A) -> Result<T, E>,
    {
        let namespace = namespace.into();
        MemoizedFn {
            lock: namespace_lock(&self.sync_locks, &namespace),
            core: self.core(namespace),
            func: Arc::new(func),
            _marker: PhantomData,
        }
    }

    /// Wrap a suspending computation
    ///
    /// Waiters park on a `tokio` mutex, shared per namespace like the
    /// blocking variant, instead of blocking their thread.
    /// Backend reads and writes still run inline, so a slow remote tier
    /// delays the calling task by up to its configured timeout.
    pub fn memoize_suspending<A, T, E, F, Fut>(
        &self,
        namespace: impl Into<String>,
        func: F,
    ) -> AsyncMemoizedFn<A, T, E, F>
    where
        A: Serialize + 'static,
        T: Serialize + DeserializeOwned,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let namespace = namespace.into();
        AsyncMemoizedFn {
            lock: namespace_lock(&self.async_locks, &namespace),
            core: self.core(namespace),
            func: Arc::new(func),
            _marker: PhantomData,
        }
    }
}

/// Blocking memoized function; clones share the lock, stats and cache
pub struct MemoizedFn<A, T, E, F> {
    core: MemoCore<A>,
    func: Arc<F>,
    lock: Arc<parking_lot::Mutex<()>>,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<A, T, E, F> MemoizedFn<A, T, E, F>
where
    T: Serialize + DeserializeOwned,
    F: Fn(A) -> Result<T, E>,
{
    /// Return the cached result for `args`, computing it at most once
    pub fn call(&self, args: A) -> Result<T, E> {
        let Some(key) = self.core.key(&args) else {
            let result = (self.func)(args);
            self.core.record_computation(&result);
            return result;
        };

        if let Some(value) = self.core.lookup(&key) {
            self.core.record_hit();
            trace!(namespace = %self.core.namespace, key = %key, "Memo fast-path hit");
            return Ok(value);
        }
        self.core.record_provisional_miss();

        let _guard = self.lock.lock();
        if let Some(value) = self.core.lookup(&key) {
            self.core.convert_miss_to_hit();
            trace!(namespace = %self.core.namespace, key = %key, "Memo hit after waiting");
            return Ok(value);
        }

        let result = (self.func)(args);
        self.core.record_computation(&result);
        let value = result?;
        self.core.store(&key, &value);
        Ok(value)
    }
}

impl<A, T, E, F> MemoizedFn<A, T, E, F> {
    /// Override the TTL used for this function's results
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.core.ttl = ttl;
        self
    }

    /// Drop the cached result for `args`; `true` if one was removed
    pub fn invalidate(&self, args: &A) -> bool {
        self.core.invalidate(args)
    }

    /// Key a call with `args` maps to, if it can be derived
    pub fn key_for(&self, args: &A) -> Option<CacheKey> {
        self.core.key(args)
    }

    /// Namespace this function's keys live under
    pub fn namespace(&self) -> &str {
        &self.core.namespace
    }

    /// Lifetime given to newly stored results
    pub fn ttl(&self) -> Duration {
        self.core.ttl
    }

    /// Snapshot of this wrapper's hit, miss and computation counters
    ///
    /// Counters are per wrapper (shared with its clones), not per namespace.
    pub fn stats(&self) -> MemoStats {
        self.core.counters.snapshot()
    }
}

impl<A: 'static, T, E, F> MemoizedFn<A, T, E, F> {
    /// Replace argument serialization with a caller-supplied key function
    pub fn with_key_fn<K>(mut self, key_fn: K) -> Self
    where
        K: Fn(&A) -> CacheKey + Send + Sync + 'static,
    {
        self.core.with_key_fn(key_fn);
        self
    }
}

impl<A, T, E, F> Clone for MemoizedFn<A, T, E, F> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            func: Arc::clone(&self.func),
            lock: Arc::clone(&self.lock),
            _marker: PhantomData,
        }
    }
}

impl<A, T, E, F> fmt::Debug for MemoizedFn<A, T, E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedFn")
            .field("namespace", &self.core.namespace)
            .field("ttl", &self.core.ttl)
            .finish_non_exhaustive()
    }
}

/// Suspending memoized function; clones share the lock, stats and cache
pub struct AsyncMemoizedFn<A, T, E, F> {
    core: MemoCore<A>,
    func: Arc<F>,
    lock: Arc<tokio::sync::Mutex<()>>,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<A, T, E, F> AsyncMemoizedFn<A, T, E, F>
where
    T: Serialize + DeserializeOwned,
{
    /// Return the cached result for `args`, computing it at most once
    pub async fn call<Fut>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(key) = self.core.key(&args) else {
            let result = (self.func)(args).await;
            self.core.record_computation(&result);
            return result;
        };

        if let Some(value) = self.core.lookup(&key) {
            self.core.record_hit();
            trace!(namespace = %self.core.namespace, key = %key, "Memo fast-path hit");
            return Ok(value);
        }
        self.core.record_provisional_miss();

        let _guard = self.lock.lock().await;
        if let Some(value) = self.core.lookup(&key) {
            self.core.convert_miss_to_hit();
            trace!(namespace = %self.core.namespace, key = %key, "Memo hit after waiting");
            return Ok(value);
        }

        let result = (self.func)(args).await;
        self.core.record_computation(&result);
        let value = result?;
        self.core.store(&key, &value);
        Ok(value)
    }
}

impl<A, T, E, F> AsyncMemoizedFn<A, T, E, F> {
    /// Override the TTL used for this function's results
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.core.ttl = ttl;
        self
    }

    /// Drop the cached result for `args`; `true` if one was removed
    pub fn invalidate(&self, args: &A) -> bool {
        self.core.invalidate(args)
    }

    /// Key a call with `args` maps to, if it can be derived
    pub fn key_for(&self, args: &A) -> Option<CacheKey> {
        self.core.key(args)
    }

    /// Namespace this function's keys live under
    pub fn namespace(&self) -> &str {
        &self.core.namespace
    }

    /// Lifetime given to newly stored results
    pub fn ttl(&self) -> Duration {
        self.core.ttl
    }

    /// Snapshot of this wrapper's counters
    pub fn stats(&self) -> MemoStats {
        self.core.counters.snapshot()
    }
}

impl<A: 'static, T, E, F> AsyncMemoizedFn<A, T, E, F> {
    /// Replace argument serialization with a caller-supplied key function
    pub fn with_key_fn<K>(mut self, key_fn: K) -> Self
    where
        K: Fn(&A) -> CacheKey + Send + Sync + 'static,
    {
        self.core.with_key_fn(key_fn);
        self
    }
}

impl<A, T, E, F> Clone for AsyncMemoizedFn<A, T, E, F> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            func: Arc::clone(&self.func),
            lock: Arc::clone(&self.lock),
            _marker: PhantomData,
        }
    }
}

impl<A, T, E, F> fmt::Debug for AsyncMemoizedFn<A, T, E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMemoizedFn")
            .field("namespace", &self.core.namespace)
            .field("ttl", &self.core.ttl)
            .finish_non_exhaustive()
    }
}
