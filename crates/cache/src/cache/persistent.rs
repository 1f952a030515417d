//! Disk-durable LRU cache that survives restarts
//!
//! [`PersistentCacheManager`] keeps an LRU index of at most `max_size`
//! entries in memory and writes every entry to its own file under the
//! storage directory:
//!
//! ```text
//! {dir}/{namespace}_{blake3(key)}.cache    one DiskRecord (JSON)
//! {dir}/{namespace}_metadata.json          MetadataIndex for the namespace
//! ```
//!
//! The metadata index records creation time, TTL and size per key hash so
//! statistics and expiry sweeps never open the value files. All files are
//! written to a temporary sibling and renamed into place.
//!
//! Disk problems never fail a call. A failed write is logged and the value
//! stays valid in memory for the rest of the process lifetime.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, trace};

use super::entry::CacheEntry;
use super::stats::StatsCollector;
use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, CacheResult};
use crate::logging::log_backend_failure;

const BACKEND: &str = "persistent";
const METADATA_VERSION: u32 = 1;
const RECORD_EXTENSION: &str = "cache";

/// One value file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    expires_at: DateTime<Utc>,
    entry: CacheEntry,
}

/// Per-key summary kept in the namespace metadata file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Original (unhashed) key
    pub key: String,
    /// When the value was stored
    pub created_at: DateTime<Utc>,
    /// Lifetime from `created_at`; 0 means already expired
    pub ttl_seconds: u64,
    /// Size of the value file in bytes
    pub size_bytes: u64,
}

impl MetadataRecord {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::seconds(i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX));
        self.created_at.checked_add_signed(ttl).is_some_and(|expires| now > expires)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MetadataIndex {
    version: u32,
    records: BTreeMap<String, MetadataRecord>,
}

/// Snapshot returned by [`PersistentCacheManager::stats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistentStats {
    pub namespace: String,
    /// Entries in the in-memory LRU index
    pub memory_entries: usize,
    /// Entries tracked by the metadata index
    pub disk_entries: usize,
    /// Total size of tracked value files
    pub disk_bytes: u64,
    /// Capacity of the LRU index
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    /// Entries pushed out by capacity, from memory or disk
    pub evictions: u64,
    pub expirations: u64,
    /// Disk and encoding failures absorbed
    pub errors: u64,
}

struct ManagerState {
    index: LruCache<String, CacheEntry>,
    metadata: BTreeMap<String, MetadataRecord>,
}

/// LRU index with per-entry disk durability, scoped to one namespace
///
/// Several managers may share a directory as long as their namespaces
/// differ; `clear` only removes files of its own namespace.
pub struct PersistentCacheManager<C = SystemClock>
where
    C: Clock,
{
    dir: PathBuf,
    namespace: String,
    max_size: NonZeroUsize,
    default_ttl: Duration,
    state: Mutex<ManagerState>,
    stats: StatsCollector,
    clock: C,
}

impl PersistentCacheManager<SystemClock> {
    /// Open (or create) the store for `namespace` under `dir`
    pub fn open(
        dir: impl Into<PathBuf>,
        namespace: impl Into<String>,
        max_size: usize,
        default_ttl: Duration,
    ) -> CacheResult<Self> {
        Self::with_clock(dir, namespace, max_size, default_ttl, SystemClock)
    }
}

impl<C: Clock> PersistentCacheManager<C> {
    /// Open the store with a custom clock (useful for testing)
    ///
    /// Fails only if the directory cannot be created or the namespace is
    /// unusable in a file name. An unreadable metadata file is logged and
    /// replaced.
    #[instrument(skip_all)]
    pub fn with_clock(
        dir: impl Into<PathBuf>,
        namespace: impl Into<String>,
        max_size: usize,
        default_ttl: Duration,
        clock: C,
    ) -> CacheResult<Self> {
        let dir = dir.into();
        let namespace = namespace.into();
        if namespace.is_empty()
            || !namespace.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CacheError::Config(format!(
                "namespace '{namespace}' must be non-empty ASCII alphanumerics, '-' or '_'"
            )));
        }
        fs::create_dir_all(&dir)?;

        let max_size = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        let manager = Self {
            state: Mutex::new(ManagerState {
                index: LruCache::new(max_size),
                metadata: BTreeMap::new(),
            }),
            dir,
            namespace,
            max_size,
            default_ttl,
            stats: StatsCollector::new(),
            clock,
        };

        let restored = manager.load_metadata();
        let count = restored.len();
        manager.state.lock().metadata = restored;
        info!(
            namespace = %manager.namespace,
            dir = %manager.dir.display(),
            restored = count,
            "Opened persistent cache"
        );
        Ok(manager)
    }

    /// Namespace prefixing every file this manager owns
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Storage directory, possibly shared with other namespaces
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store `value` for `ttl` (or the default TTL)
    ///
    /// Returns `false` only when `value` cannot be encoded. Disk failures
    /// are logged and the value is still served from memory.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                self.absorb("set", key, &err.into());
                return false;
            }
        };
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = CacheEntry::new_at(encoded, ttl, self.clock.utc_now());

        let mut state = self.state.lock();
        self.insert_indexed(&mut state, key, entry.clone());
        if let Err(err) = self.persist(&mut state, key, &entry) {
            self.absorb("persist", key, &err);
        }
        self.trim_disk(&mut state);
        self.stats.record_set();
        true
    }

    /// Typed lookup; `None` on miss, expiry, or a value of another shape
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(err) => {
                self.absorb("decode", key, &err.into());
                None
            }
        }
    }

    /// Typed lookup falling back to `default`
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Raw lookup: memory first, then disk (warming memory on a disk hit)
    pub fn get_value(&self, key: &str) -> Option<Value> {
        let now = self.clock.utc_now();
        let mut state = self.state.lock();

        let memory = state.index.get_mut(key).map(|entry| {
            if entry.is_expired_at(now) {
                None
            } else {
                entry.touch_at(now);
                Some(entry.value.clone())
            }
        });
        match memory {
            Some(Some(value)) => {
                self.stats.record_hit();
                return Some(value);
            }
            Some(None) => {
                self.expire(&mut state, key);
                self.stats.record_miss();
                return None;
            }
            None => {}
        }

        let record = match self.read_record(key) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.stats.record_miss();
                return None;
            }
            Err(err) => {
                self.absorb("read", key, &err);
                // An undecodable record will never read back; drop it
                if matches!(err, CacheError::Serialization(_)) {
                    self.remove_persisted(&mut state, key);
                    debug!(namespace = %self.namespace, key, "Removed corrupt record");
                }
                self.stats.record_miss();
                return None;
            }
        };

        if record.entry.is_expired_at(now) {
            self.expire(&mut state, key);
            self.stats.record_miss();
            return None;
        }

        let mut entry = record.entry;
        entry.touch_at(now);
        let value = entry.value.clone();
        self.insert_indexed(&mut state, key, entry);
        self.stats.record_hit();
        trace!(namespace = %self.namespace, key, "Warmed memory index from disk");
        Some(value)
    }

    /// Whether `key` holds an unexpired value in memory or on disk
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.utc_now();
        let state = self.state.lock();
        if let Some(entry) = state.index.peek(key) {
            return !entry.is_expired_at(now);
        }
        state.metadata.get(&self.hash_key(key)).is_some_and(|record| !record.is_expired_at(now))
    }

    /// Remove `key` from memory and disk; `true` if it existed anywhere
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let in_memory = state.index.pop(key).is_some();
        let on_disk = self.remove_persisted(&mut state, key);
        in_memory || on_disk
    }

    /// Remove every entry of this namespace from memory and disk
    ///
    /// Files of other namespaces sharing the directory are left alone.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        state.index.clear();
        state.metadata.clear();

        let mut removed = 0;
        match fs::read_dir(&self.dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else { continue };
                    if !self.owns_file(name) {
                        continue;
                    }
                    match fs::remove_file(entry.path()) {
                        Ok(()) => removed += 1,
                        Err(err) => self.absorb("clear", name, &err.into()),
                    }
                }
            }
            Err(err) => self.absorb("clear", &self.namespace, &err.into()),
        }
        if let Err(err) = remove_if_exists(&self.metadata_path()) {
            self.absorb("clear", &self.namespace, &err.into());
        }

        debug!(namespace = %self.namespace, removed, "Cleared persistent cache");
        removed
    }

    /// Drop expired entries from memory and disk, returning how many went
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.utc_now();
        let mut state = self.state.lock();

        let mut expired: Vec<String> = state
            .index
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        expired.extend(
            state
                .metadata
                .values()
                .filter(|record| record.is_expired_at(now))
                .map(|record| record.key.clone()),
        );
        expired.sort();
        expired.dedup();

        for key in &expired {
            state.index.pop(key.as_str());
            self.remove_record_file(key);
            state.metadata.remove(&self.hash_key(key));
            self.stats.record_expiration();
        }
        if !expired.is_empty() {
            self.save_metadata_logged(&state);
            debug!(removed = expired.len(), "Swept expired persistent entries");
        }
        expired.len()
    }

    /// Number of distinct keys held in memory or on disk
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        let memory_only = state
            .index
            .iter()
            .filter(|(key, _)| !state.metadata.contains_key(&self.hash_key(key)))
            .count();
        state.metadata.len() + memory_only
    }

    /// Check if the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of counters and memory/disk occupancy
    pub fn stats(&self) -> PersistentStats {
        let counters = self.stats.snapshot(BACKEND);
        let state = self.state.lock();
        PersistentStats {
            namespace: self.namespace.clone(),
            memory_entries: state.index.len(),
            disk_entries: state.metadata.len(),
            disk_bytes: state.metadata.values().map(|record| record.size_bytes).sum(),
            max_size: self.max_size.get(),
            hits: counters.hits,
            misses: counters.misses,
            sets: counters.sets,
            evictions: counters.evictions,
            expirations: counters.expirations,
            errors: counters.errors,
        }
    }

    fn absorb(&self, operation: &str, key: &str, err: &CacheError) {
        log_backend_failure(operation, key, BACKEND, err);
        self.stats.record_error();
    }

    fn hash_key(&self, key: &str) -> String {
        blake3::hash(key.as_bytes()).to_hex().to_string()
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.{RECORD_EXTENSION}", self.namespace, self.hash_key(key)))
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(format!("{}_metadata.json", self.namespace))
    }

    /// `{namespace}_{64 hex}.cache`, nothing looser
    fn owns_file(&self, name: &str) -> bool {
        name.strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.strip_suffix(".cache"))
            .is_some_and(|hash| hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit()))
    }

    /// Put `entry` in the LRU index, evicting the oldest key from memory and
    /// disk if the index is full
    fn insert_indexed(&self, state: &mut ManagerState, key: &str, entry: CacheEntry) {
        if let Some((evicted, _)) = state.index.push(key.to_string(), entry) {
            if evicted != key {
                self.remove_persisted(state, &evicted);
                self.stats.record_eviction();
                trace!(namespace = %self.namespace, key = %evicted, "Evicted LRU entry");
            }
        }
    }

    /// Bound disk-only entries (left over from earlier runs) to `max_size`
    fn trim_disk(&self, state: &mut ManagerState) {
        let excess = state.metadata.len().saturating_sub(self.max_size.get());
        if excess == 0 {
            return;
        }
        let mut disk_only: Vec<MetadataRecord> = state
            .metadata
            .values()
            .filter(|record| !state.index.contains(record.key.as_str()))
            .cloned()
            .collect();
        disk_only.sort_by_key(|record| record.created_at);
        for record in disk_only.into_iter().take(excess) {
            self.remove_persisted(state, &record.key);
            self.stats.record_eviction();
        }
    }

    fn expire(&self, state: &mut ManagerState, key: &str) {
        state.index.pop(key);
        self.remove_persisted(state, key);
        self.stats.record_expiration();
        trace!(namespace = %self.namespace, key, "Dropped expired entry");
    }

    fn persist(&self, state: &mut ManagerState, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        let record = DiskRecord {
            key: key.to_string(),
            expires_at: entry.expires_at(),
            entry: entry.clone(),
        };
        let bytes = serde_json::to_vec(&record)?;
        write_atomic(&self.record_path(key), &bytes)?;

        state.metadata.insert(
            self.hash_key(key),
            MetadataRecord {
                key: key.to_string(),
                created_at: entry.created_at,
                ttl_seconds: entry.ttl_seconds,
                size_bytes: bytes.len() as u64,
            },
        );
        self.save_metadata(state)
    }

    /// Remove the value file and metadata record; `true` if either existed
    fn remove_persisted(&self, state: &mut ManagerState, key: &str) -> bool {
        let had_file = self.remove_record_file(key);
        let had_record = state.metadata.remove(&self.hash_key(key)).is_some();
        if had_record {
            self.save_metadata_logged(state);
        }
        had_file || had_record
    }

    fn remove_record_file(&self, key: &str) -> bool {
        match remove_if_exists(&self.record_path(key)) {
            Ok(existed) => existed,
            Err(err) => {
                self.absorb("delete", key, &err.into());
                false
            }
        }
    }

    fn read_record(&self, key: &str) -> CacheResult<Option<DiskRecord>> {
        let bytes = match fs::read(self.record_path(key)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record: DiskRecord = serde_json::from_slice(&bytes)?;
        // Hash collision: the file belongs to a different key
        if record.key != key {
            return Ok(None);
        }
        Ok(Some(record))
    }

    fn load_metadata(&self) -> BTreeMap<String, MetadataRecord> {
        let path = self.metadata_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(err) => {
                self.absorb("load_metadata", &self.namespace, &err.into());
                return BTreeMap::new();
            }
        };
        match serde_json::from_slice::<MetadataIndex>(&bytes) {
            Ok(index) => index.records,
            Err(err) => {
                self.absorb("load_metadata", &self.namespace, &err.into());
                BTreeMap::new()
            }
        }
    }

    fn save_metadata(&self, state: &ManagerState) -> CacheResult<()> {
        let index = MetadataIndex { version: METADATA_VERSION, records: state.metadata.clone() };
        let bytes = serde_json::to_vec_pretty(&index)?;
        write_atomic(&self.metadata_path(), &bytes)
    }

    fn save_metadata_logged(&self, state: &ManagerState) {
        if let Err(err) = self.save_metadata(state) {
            self.absorb("save_metadata", &self.namespace, &err);
        }
    }
}

impl<C: Clock> std::fmt::Debug for PersistentCacheManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCacheManager")
            .field("dir", &self.dir)
            .field("namespace", &self.namespace)
            .field("max_size", &self.max_size)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

/// Write to a temporary sibling, fsync, then rename into place
fn write_atomic(path: &Path, bytes: &[u8]) -> CacheResult<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for cache::persistent.
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::clock::MockClock;

    fn manager(dir: &TempDir, namespace: &str, max_size: usize) -> PersistentCacheManager {
        PersistentCacheManager::open(dir.path(), namespace, max_size, Duration::from_secs(3600))
            .unwrap()
    }

    /// Validates `PersistentCacheManager::open` behavior for the restart
    /// durability scenario.
    ///
    /// # Test Steps
    /// 1. Store a nested value through one manager
    /// 2. Drop it and open a fresh manager over the same directory
    /// 3. Read the value back
    ///
    /// Assertions:
    /// - Confirms the fresh instance returns the original value.
    /// - Confirms the metadata index was restored before any read.
    #[test]
    fn test_value_survives_restart() {
        let dir = TempDir::new().unwrap();
        let value = json!({"term": "lemma", "senses": [{"n": 1}]});
        {
            let first = manager(&dir, "defs", 10);
            assert!(first.set("lemma", &value, None));
        }

        let second = manager(&dir, "defs", 10);
        assert_eq!(second.stats().disk_entries, 1);
        assert_eq!(second.stats().memory_entries, 0);
        assert_eq!(second.get::<Value>("lemma"), Some(value));
        assert_eq!(second.stats().memory_entries, 1);
    }

    /// Validates `PersistentCacheManager::set` behavior for the lru eviction
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the least recently used key is evicted from memory and
    ///   disk.
    /// - Confirms refreshed and newer keys remain.
    #[test]
    fn test_lru_eviction_removes_disk_copy() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, "lru", 2);

        cache.set("a", &1, None);
        cache.set("b", &2, None);
        assert_eq!(cache.get::<i32>("a"), Some(1));
        cache.set("c", &3, None);

        assert_eq!(cache.get::<i32>("b"), None);
        assert!(!cache.record_path("b").exists());
        assert_eq!(cache.get::<i32>("a"), Some(1));
        assert_eq!(cache.get::<i32>("c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    /// Validates `PersistentCacheManager::get` behavior for the expiry
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures an expired value is a miss.
    /// - Confirms both the memory and disk representations are removed.
    #[test]
    fn test_expired_entry_removed_everywhere() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new();
        let cache = PersistentCacheManager::with_clock(
            dir.path(),
            "ttl",
            10,
            Duration::from_secs(3600),
            clock.clone(),
        )
        .unwrap();

        cache.set("k", &"v", Some(Duration::from_secs(5)));
        clock.advance_secs(6);

        assert_eq!(cache.get_or("k", "fallback".to_string()), "fallback");
        assert!(!cache.record_path("k").exists());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    /// Validates `PersistentCacheManager::get` behavior for the expired on
    /// disk after restart scenario.
    ///
    /// Assertions:
    /// - Ensures a fresh instance does not serve a value that expired while
    ///   the process was down.
    #[test]
    fn test_expired_on_disk_not_served_after_restart() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new();
        let open = |clock: MockClock| {
            let ttl = Duration::from_secs(3600);
            PersistentCacheManager::with_clock(dir.path(), "ttl", 10, ttl, clock).unwrap()
        };

        open(clock.clone()).set("k", &1, Some(Duration::from_secs(10)));
        clock.advance_secs(11);

        let reopened = open(clock.clone());
        assert!(!reopened.contains("k"));
        assert_eq!(reopened.get::<i32>("k"), None);
        assert_eq!(reopened.stats().disk_entries, 0);
    }

    /// Validates `PersistentCacheManager::clear` behavior for the shared
    /// directory scenario.
    ///
    /// Assertions:
    /// - Confirms only this namespace's files are removed.
    /// - Confirms unrelated files and prefix-sharing namespaces survive.
    #[test]
    fn test_clear_respects_namespace() {
        let dir = TempDir::new().unwrap();
        let ours = manager(&dir, "app", 10);
        let theirs = manager(&dir, "app_v2", 10);
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        ours.set("x", &1, None);
        ours.set("y", &2, None);
        theirs.set("x", &3, None);

        assert_eq!(ours.clear(), 2);
        assert!(ours.is_empty());
        assert!(!ours.metadata_path().exists());
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(theirs.get::<i32>("x"), Some(3));
        assert!(theirs.metadata_path().exists());
    }

    /// Validates `PersistentCacheManager::delete` behavior for the removal
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms delete removes memory and disk copies.
    /// - Ensures a second delete reports nothing removed.
    #[test]
    fn test_delete_removes_both_representations() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, "del", 10);
        cache.set("k", &json!([1, 2, 3]), None);

        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert!(!cache.record_path("k").exists());
        assert_eq!(manager(&dir, "del", 10).get::<Value>("k"), None);
    }

    /// Validates `PersistentCacheManager::cleanup_expired` behavior for the
    /// sweep scenario.
    ///
    /// Assertions:
    /// - Confirms only expired entries are swept.
    /// - Confirms the metadata index reflects the sweep.
    #[test]
    fn test_cleanup_expired_sweeps_disk() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new();
        let cache = PersistentCacheManager::with_clock(
            dir.path(),
            "sweep",
            10,
            Duration::from_secs(100),
            clock.clone(),
        )
        .unwrap();

        cache.set("short", &1, Some(Duration::from_secs(1)));
        cache.set("long", &2, None);
        clock.advance_secs(2);

        assert_eq!(cache.cleanup_expired(), 1);
        let stats = cache.stats();
        assert_eq!((stats.disk_entries, stats.memory_entries), (1, 1));
        assert!(stats.disk_bytes > 0);
        assert!(cache.contains("long"));
    }

    /// Validates `PersistentCacheManager::open` behavior for the corrupt
    /// metadata scenario.
    ///
    /// Assertions:
    /// - Ensures a garbled metadata file is tolerated.
    /// - Confirms the manager still stores and serves values.
    #[test]
    fn test_corrupt_metadata_tolerated() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad_metadata.json"), "{not json").unwrap();

        let cache = manager(&dir, "bad", 10);
        assert_eq!(cache.stats().errors, 1);
        assert!(cache.set("k", &true, None));
        assert_eq!(cache.get::<bool>("k"), Some(true));
    }

    /// Validates `PersistentCacheManager::get` behavior for the corrupt
    /// record scenario.
    ///
    /// Assertions:
    /// - Ensures a garbled value file is a miss counted as one error.
    /// - Confirms the file and its metadata record are removed.
    /// - Confirms later reads miss quietly without adding errors.
    #[test]
    fn test_corrupt_record_removed_on_read() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, "junk", 10);
        cache.set("k", &1, None);
        {
            let mut state = cache.state.lock();
            state.index.pop("k");
        }
        fs::write(cache.record_path("k"), b"{truncated").unwrap();

        assert_eq!(cache.get::<i32>("k"), None);
        assert!(!cache.record_path("k").exists());
        assert_eq!(cache.stats().errors, 1);
        assert_eq!(cache.stats().disk_entries, 0);

        assert_eq!(cache.get::<i32>("k"), None);
        assert_eq!(cache.stats().errors, 1);
        assert_eq!(cache.stats().misses, 2);
    }

    /// Validates `PersistentCacheManager::open` behavior for the invalid
    /// namespace scenario.
    ///
    /// Assertions:
    /// - Ensures namespaces that could escape the directory are rejected.
    #[test]
    fn test_invalid_namespace_rejected() {
        let dir = TempDir::new().unwrap();
        let result = PersistentCacheManager::open(dir.path(), "../up", 10, Duration::from_secs(1));
        assert!(matches!(result, Err(CacheError::Config(_))));
    }
}
