//! Explicit cache handle
//!
//! A [`CacheContext`] is built once at startup from [`CacheSettings`] and
//! passed by handle to whatever needs caching. There are no process-wide
//! cache instances: two contexts in one process (or one per test) never
//! share state unless they share a backend on purpose.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{
    AsyncMemoizedFn, BackendStats, CacheBackend, CacheEntry, CacheHealthReport, CacheKey,
    DisabledBackend, HybridBackend, MemoizedFn, MemoryBackend, PersistentCacheManager,
    RemoteBackend, ThreadSafeMemoizer,
};
use crate::config::{loader, BackendKind, CacheSettings};
use crate::error::CacheResult;
use crate::logging::log_backend_failure;

/// Cache facade handed to consumers; clones share everything
#[derive(Debug, Clone)]
pub struct CacheContext {
    settings: Arc<CacheSettings>,
    memoizer: ThreadSafeMemoizer,
    persistent: Arc<Mutex<HashMap<String, Arc<PersistentCacheManager>>>>,
}

impl CacheContext {
    /// Build the backend selected by `settings`
    ///
    /// Remote-backed tiers connect lazily, so an unreachable server does
    /// not fail construction.
    ///
    /// # Errors
    /// Returns `CacheError::Config` if the settings do not validate.
    pub fn new(settings: CacheSettings) -> CacheResult<Self> {
        settings.validate()?;
        let backend: Arc<dyn CacheBackend> = match settings.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new(settings.max_entries)),
            BackendKind::Remote => Arc::new(Self::remote(&settings)),
            BackendKind::Hybrid => Arc::new(HybridBackend::new(
                MemoryBackend::new(settings.max_entries),
                Self::remote(&settings),
            )),
            BackendKind::Disabled => Arc::new(DisabledBackend::new()),
        };
        info!(
            backend = %settings.backend,
            max_entries = settings.max_entries,
            default_ttl = settings.default_ttl,
            "Cache context ready"
        );
        Ok(Self::assemble(settings, backend))
    }

    /// Build from [`loader::load`] (config file or environment)
    pub fn from_env() -> CacheResult<Self> {
        Self::new(loader::load()?)
    }

    /// Use an already-built backend instead of the one `settings` selects
    pub fn with_backend(
        settings: CacheSettings,
        backend: Arc<dyn CacheBackend>,
    ) -> CacheResult<Self> {
        settings.validate()?;
        Ok(Self::assemble(settings, backend))
    }

    fn assemble(settings: CacheSettings, backend: Arc<dyn CacheBackend>) -> Self {
        let memoizer = ThreadSafeMemoizer::new(backend, settings.ttl());
        Self { settings: Arc::new(settings), memoizer, persistent: Arc::default() }
    }

    fn remote(settings: &CacheSettings) -> RemoteBackend {
        RemoteBackend::connect_lazy(
            settings.remote_url.clone(),
            settings.key_prefix.clone(),
            settings.remote_timeout(),
        )
    }

    /// Settings this context was built from
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Backend behind every read, write and memoized call
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        self.memoizer.backend()
    }

    /// Cached value for `key`, if present and unexpired
    pub fn get_cached(&self, key: impl Into<CacheKey>) -> Option<Value> {
        self.backend().get(&key.into()).map(|entry| entry.value)
    }

    /// Cached value decoded as `T`; a value of another shape is a miss
    pub fn get_cached_as<T: DeserializeOwned>(&self, key: impl Into<CacheKey>) -> Option<T> {
        let key = key.into();
        let value = self.backend().get(&key)?.value;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                log_backend_failure("decode", key.as_str(), self.backend().name(), &err.into());
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl` (or the default TTL)
    pub fn set_cached<T: Serialize + ?Sized>(
        &self,
        key: impl Into<CacheKey>,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        let key = key.into();
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                log_backend_failure("encode", key.as_str(), self.backend().name(), &err.into());
                return false;
            }
        };
        let entry = CacheEntry::new(encoded, ttl.unwrap_or_else(|| self.settings.ttl()));
        self.backend().set(&key, entry)
    }

    /// Remove `key`; `true` if something was removed
    pub fn invalidate(&self, key: impl Into<CacheKey>) -> bool {
        self.backend().delete(&key.into())
    }

    /// Remove every entry from every tier
    pub fn clear_all(&self) -> bool {
        let cleared = self.backend().clear();
        debug!(backend = self.backend().name(), cleared, "Cleared cache context");
        cleared
    }

    /// Counters and occupancy of the active backend
    pub fn get_statistics(&self) -> BackendStats {
        self.backend().stats()
    }

    /// Health classification of [`get_statistics`](Self::get_statistics)
    pub fn health_report(&self) -> CacheHealthReport {
        CacheHealthReport::from_stats(self.get_statistics())
    }

    /// Memoizer shared by all wrappers created through this context
    pub fn memoizer(&self) -> &ThreadSafeMemoizer {
        &self.memoizer
    }

    /// See [`ThreadSafeMemoizer::memoize_sync`]
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
        self.memoizer.memoize_sync(namespace, func)
    }

    /// See [`ThreadSafeMemoizer::memoize_suspending`]
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
        self.memoizer.memoize_suspending(namespace, func)
    }

    /// Disk-durable store for `namespace` under the storage directory
    ///
    /// The first call opens the store; later calls on this context (or its
    /// clones) return the same manager, since two managers writing one
    /// namespace would overwrite each other's metadata.
    ///
    /// # Errors
    /// Returns an error if the store cannot be opened.
    pub fn persistent(&self, namespace: &str) -> CacheResult<Arc<PersistentCacheManager>> {
        let mut managers = self.persistent.lock();
        if let Some(manager) = managers.get(namespace) {
            return Ok(Arc::clone(manager));
        }
        let manager = Arc::new(PersistentCacheManager::open(
            self.settings.storage_dir.clone(),
            namespace,
            self.settings.max_entries,
            self.settings.ttl(),
        )?);
        managers.insert(namespace.to_string(), Arc::clone(&manager));
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for context.
    use serde_json::json;

    use super::*;
    use crate::error::CacheError;

    fn memory_context(max_entries: usize) -> CacheContext {
        CacheContext::new(CacheSettings::memory(max_entries, Duration::from_secs(60))).unwrap()
    }

    /// Validates `CacheContext::set_cached` behavior for the round trip
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms a nested value reads back equal, raw and typed.
    /// - Confirms invalidation removes it.
    #[test]
    fn test_round_trip_and_invalidate() {
        let cache = memory_context(10);
        let value = json!({"term": "lemma", "examples": [{"nl": "x", "en": "y"}]});

        assert!(cache.set_cached("def:lemma", &value, None));
        assert_eq!(cache.get_cached("def:lemma"), Some(value.clone()));
        assert_eq!(cache.get_cached_as::<Value>("def:lemma"), Some(value));
        assert_eq!(cache.get_cached_as::<u32>("def:lemma"), None);

        assert!(cache.invalidate("def:lemma"));
        assert_eq!(cache.get_cached("def:lemma"), None);
    }

    /// Validates `CacheContext::new` behavior for the isolation scenario.
    ///
    /// Assertions:
    /// - Ensures two contexts in one process never share entries.
    #[test]
    fn test_contexts_are_independent() {
        let first = memory_context(10);
        let second = memory_context(10);

        first.set_cached("k", &1, None);
        assert_eq!(second.get_cached("k"), None);

        let shared = first.clone();
        assert_eq!(shared.get_cached_as::<i32>("k"), Some(1));
    }

    /// Validates `CacheContext::get_statistics` behavior for the counters
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms hits, misses and entries flow through from the backend.
    /// - Confirms the health report reads the same statistics.
    #[test]
    fn test_statistics_and_health() {
        let cache = memory_context(10);
        cache.set_cached("a", &1, None);
        cache.get_cached("a");
        cache.get_cached("missing");

        let stats = cache.get_statistics();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < 1e-10);
        assert!(cache.health_report().is_healthy());

        assert!(cache.clear_all());
        assert_eq!(cache.get_statistics().entries, 0);
    }

    /// Validates `CacheContext::new` behavior for the disabled backend
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures writes report failure and reads always miss.
    /// - Confirms memoized calls still compute.
    #[test]
    fn test_disabled_context_always_misses() {
        let cache = CacheContext::new(CacheSettings::disabled()).unwrap();
        assert!(!cache.set_cached("k", &1, None));
        assert_eq!(cache.get_cached("k"), None);

        let double = cache.memoize_sync("double", |n: i32| Ok::<_, String>(n * 2));
        assert_eq!(double.call(4), Ok(8));
        assert_eq!(double.call(4), Ok(8));
        assert_eq!(double.stats().computations, 2);
    }

    /// Validates `CacheContext::new` behavior for the remote backend lazy
    /// connect scenario.
    ///
    /// Assertions:
    /// - Ensures construction succeeds with an unreachable remote store.
    /// - Ensures reads degrade to misses instead of failing.
    #[test]
    fn test_unreachable_remote_does_not_block_startup() {
        let settings = CacheSettings::builder()
            .backend(BackendKind::Remote)
            .remote_url("redis://127.0.0.1:1")
            .remote_timeout(Duration::from_millis(50))
            .build();
        let cache = CacheContext::new(settings).unwrap();

        assert_eq!(cache.get_cached("k"), None);
        assert!(!cache.set_cached("k", &1, None));
        assert!(cache.get_statistics().errors >= 2);
    }

    /// Validates `CacheContext::persistent` behavior for the repeated open
    /// scenario.
    ///
    /// # Test Steps
    /// 1. Request the same namespace twice with a capacity of two
    /// 2. Write one key through the first handle, two through the second
    ///
    /// Assertions:
    /// - Confirms both handles are the same manager.
    /// - Confirms the capacity bound holds across handles, on disk and in
    ///   the metadata index.
    #[test]
    fn test_persistent_namespace_opened_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = CacheSettings::builder().max_entries(2).storage_dir(dir.path()).build();
        let cache = CacheContext::new(settings).unwrap();

        let first = cache.persistent("words").unwrap();
        let second = cache.clone().persistent("words").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        first.set("x", &1, None);
        second.set("y", &2, None);
        second.set("z", &3, None);

        assert_eq!(first.stats().disk_entries, 2);
        let records = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "cache"))
            .count();
        assert_eq!(records, 2);
        assert!(!Arc::ptr_eq(&first, &cache.persistent("other").unwrap()));
    }

    /// Validates `CacheContext::new` behavior for the invalid settings
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures invalid settings are rejected at construction.
    #[test]
    fn test_invalid_settings_rejected() {
        let settings = CacheSettings::builder().max_entries(0).build();
        assert!(matches!(CacheContext::new(settings), Err(CacheError::Config(_))));
    }
}
