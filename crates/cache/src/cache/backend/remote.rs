//! Networked shared tier
//!
//! [`RemoteBackend`] namespaces every key as `{prefix}:{key}` and stores the
//! whole [`CacheEntry`] as a JSON blob, so a reader re-validates expiry from
//! the embedded `created_at`/`ttl_seconds` even if the server clock
//! disagrees. The server's native expiry (`SET .. EX`) only reclaims space.
//!
//! The wire protocol sits behind [`RemoteStore`]; production uses
//! [`RedisStore`], tests use `testing::MockRemoteStore`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::CacheBackend;
use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::cache::stats::{BackendStats, StatsCollector};
use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, CacheResult};
use crate::logging::log_backend_failure;

const BACKEND: &str = "remote";

/// Keys fetched per `SCAN` round trip
const SCAN_BATCH: usize = 256;

/// How long `stats` reuses a counted remote entry total before scanning again
const ENTRY_COUNT_TTL: Duration = Duration::from_secs(30);

/// Minimal byte-oriented key-value protocol the remote tier needs
pub trait RemoteStore: Send + Sync {
    /// Fetch the raw value stored at `key`
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value` at `key`, expiring server-side after `ttl` when given
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()>;

    /// Remove `key`; `true` if it existed
    fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every key starting with `prefix`, returning how many went
    fn clear_prefix(&self, prefix: &str) -> CacheResult<u64>;

    /// Count keys starting with `prefix`
    fn count_prefix(&self, prefix: &str) -> CacheResult<u64>;
}

impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        (**self).set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        (**self).delete(key)
    }

    fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
        (**self).clear_prefix(prefix)
    }

    fn count_prefix(&self, prefix: &str) -> CacheResult<u64> {
        (**self).count_prefix(prefix)
    }
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`
fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('*');
    pattern
}

/// Idle connections a [`RedisStore`] keeps for reuse
const MAX_IDLE_CONNECTIONS: usize = 8;

/// Redis-backed [`RemoteStore`] over a small pool of blocking connections
///
/// Nothing touches the network until the first command, so a wrong URL or
/// a down server never blocks construction. A command checks a connection
/// out of the idle pool, runs without holding any lock and hands it back
/// on success; a failed connection is dropped and the next call dials
/// again.
///
/// Connection setup runs on a helper thread and the caller waits at most
/// `timeout` for it, since the handshake with a server that accepts but
/// never answers is not covered by the socket timeouts. Only one setup is
/// in flight at a time; callers arriving meanwhile fail fast instead of
/// queueing behind it.
pub struct RedisStore {
    url: String,
    connect_timeout: Duration,
    io_timeout: Duration,
    idle: Mutex<Vec<redis::Connection>>,
    connecting: Arc<AtomicBool>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.url)
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .field("idle_connections", &self.idle.lock().len())
            .field("connecting", &self.connecting.load(Ordering::Acquire))
            .finish()
    }
}

impl RedisStore {
    /// Create a store for `url`; `timeout` bounds connects, reads and writes
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout: timeout,
            io_timeout: timeout,
            idle: Mutex::new(Vec::new()),
            connecting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connection string this store talks to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of pooled connections waiting for reuse
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    fn open_connection(
        client: &redis::Client,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> CacheResult<redis::Connection> {
        let conn = client
            .get_connection_with_timeout(connect_timeout)
            .map_err(|err| CacheError::unavailable(BACKEND, err.to_string()))?;
        conn.set_read_timeout(Some(io_timeout))?;
        conn.set_write_timeout(Some(io_timeout))?;
        Ok(conn)
    }

    fn connect(&self) -> CacheResult<redis::Connection> {
        let client = redis::Client::open(self.url.as_str())?;
        if self.connecting.swap(true, Ordering::AcqRel) {
            return Err(CacheError::unavailable(BACKEND, "connection attempt already in flight"));
        }

        let (connect_timeout, io_timeout) = (self.connect_timeout, self.io_timeout);
        let in_flight = Arc::clone(&self.connecting);
        let (tx, rx) = mpsc::sync_channel(1);
        let spawned = thread::Builder::new().name("memotier-redis-connect".into()).spawn(move || {
            let result = Self::open_connection(&client, connect_timeout, io_timeout);
            in_flight.store(false, Ordering::Release);
            // The caller may have stopped waiting; the connection is dropped then
            let _ = tx.send(result);
        });
        if let Err(err) = spawned {
            self.connecting.store(false, Ordering::Release);
            return Err(err.into());
        }

        match rx.recv_timeout(self.connect_timeout) {
            Ok(result) => {
                let conn = result?;
                debug!(url = %self.url, "Connected to remote cache");
                Ok(conn)
            }
            Err(_) => Err(CacheError::unavailable(
                BACKEND,
                format!("connection setup exceeded {:?}", self.connect_timeout),
            )),
        }
    }

    fn release(&self, conn: redis::Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> CacheResult<T> {
        let pooled = self.idle.lock().pop();
        let mut conn = match pooled {
            Some(conn) => conn,
            None => self.connect()?,
        };

        let value = op(&mut conn)?;
        self.release(conn);
        Ok(value)
    }

    fn scan(conn: &mut redis::Connection, pattern: &str) -> redis::RedisResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query(conn)?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

impl RemoteStore for RedisStore {
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.with_connection(|conn| redis::cmd("GET").arg(key).query(conn))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        self.with_connection(|conn| {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                // EX rejects zero; round partial seconds up
                let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
                cmd.arg("EX").arg(secs.max(1));
            }
            cmd.query(conn)
        })
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        self.with_connection(|conn| {
            let removed: u64 = redis::cmd("DEL").arg(key).query(conn)?;
            Ok(removed > 0)
        })
    }

    fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let pattern = scan_pattern(prefix);
        self.with_connection(|conn| {
            let keys = Self::scan(conn, &pattern)?;
            let mut removed = 0;
            for chunk in keys.chunks(SCAN_BATCH) {
                removed += redis::cmd("DEL").arg(chunk).query::<u64>(conn)?;
            }
            Ok(removed)
        })
    }

    fn count_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let pattern = scan_pattern(prefix);
        self.with_connection(|conn| Ok(Self::scan(conn, &pattern)?.len() as u64))
    }
}

/// Shared cache tier over a [`RemoteStore`]
///
/// Every store error is logged, counted and turned into a miss or `false`.
/// The entry total reported by `stats` needs a full keyspace scan, so it is
/// refreshed at most once per [`ENTRY_COUNT_TTL`] and may lag behind writes
/// made in between.
pub struct RemoteBackend<S = RedisStore, C = SystemClock>
where
    S: RemoteStore,
    C: Clock,
{
    store: S,
    prefix: String,
    stats: StatsCollector,
    clock: C,
    entry_count: Mutex<Option<(Instant, usize)>>,
}

impl RemoteBackend<RedisStore, SystemClock> {
    /// Redis-backed tier that connects on first use
    pub fn connect_lazy(
        url: impl Into<String>,
        prefix: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self::new(RedisStore::new(url, timeout), prefix)
    }
}

impl<S: RemoteStore> RemoteBackend<S, SystemClock> {
    /// Wrap `store`, namespacing keys under `prefix`
    pub fn new(store: S, prefix: impl Into<String>) -> Self {
        Self::with_clock(store, prefix, SystemClock)
    }
}

impl<S: RemoteStore, C: Clock> RemoteBackend<S, C> {
    /// Create a backend with a custom clock (useful for testing)
    pub fn with_clock(store: S, prefix: impl Into<String>, clock: C) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            stats: StatsCollector::new(),
            clock,
            entry_count: Mutex::new(None),
        }
    }

    /// Namespace prefix applied to every key
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    fn namespaced(&self, key: &CacheKey) -> String {
        format!("{}:{}", self.prefix, key)
    }

    fn absorb(&self, operation: &str, key: &str, err: &CacheError) {
        log_backend_failure(operation, key, BACKEND, err);
        self.stats.record_error();
    }

    fn miss(&self) -> Option<CacheEntry> {
        self.stats.record_miss();
        None
    }

    fn entry_count(&self) -> usize {
        let now = self.clock.now();
        let cached = *self.entry_count.lock();
        if let Some((counted_at, count)) = cached {
            if now.saturating_duration_since(counted_at) < ENTRY_COUNT_TTL {
                return count;
            }
        }

        match self.store.count_prefix(&format!("{}:", self.prefix)) {
            Ok(count) => {
                let count = usize::try_from(count).unwrap_or(usize::MAX);
                *self.entry_count.lock() = Some((now, count));
                count
            }
            Err(err) => {
                debug!(backend = BACKEND, error = %err, "Remote entry count unavailable");
                cached.map_or(0, |(_, count)| count)
            }
        }
    }
}

impl<S: RemoteStore, C: Clock> fmt::Debug for RemoteBackend<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBackend").field("prefix", &self.prefix).finish_non_exhaustive()
    }
}

impl<S: RemoteStore, C: Clock> CacheBackend for RemoteBackend<S, C> {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let remote_key = self.namespaced(key);
        let bytes = match self.store.get(&remote_key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return self.miss(),
            Err(err) => {
                self.absorb("get", key.as_str(), &err);
                return self.miss();
            }
        };

        let mut entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(err) => {
                self.absorb("get", key.as_str(), &err.into());
                return self.miss();
            }
        };

        let now = self.clock.utc_now();
        if entry.is_expired_at(now) {
            if let Err(err) = self.store.delete(&remote_key) {
                self.absorb("delete", key.as_str(), &err);
            }
            self.stats.record_expiration();
            trace!(backend = BACKEND, key = %key, "Dropped expired remote entry");
            return self.miss();
        }

        entry.touch_at(now);
        self.stats.record_hit();
        Some(entry)
    }

    fn set(&self, key: &CacheKey, entry: CacheEntry) -> bool {
        let payload = match serde_json::to_vec(&entry) {
            Ok(payload) => payload,
            Err(err) => {
                self.absorb("set", key.as_str(), &err.into());
                return false;
            }
        };

        let ttl = entry.remaining_ttl_at(self.clock.utc_now());
        match self.store.set(&self.namespaced(key), &payload, Some(ttl)) {
            Ok(()) => {
                self.stats.record_set();
                true
            }
            Err(err) => {
                self.absorb("set", key.as_str(), &err);
                false
            }
        }
    }

    fn delete(&self, key: &CacheKey) -> bool {
        match self.store.delete(&self.namespaced(key)) {
            Ok(removed) => {
                if removed {
                    self.stats.record_delete();
                }
                removed
            }
            Err(err) => {
                self.absorb("delete", key.as_str(), &err);
                false
            }
        }
    }

    fn clear(&self) -> bool {
        let prefix = format!("{}:", self.prefix);
        match self.store.clear_prefix(&prefix) {
            Ok(removed) => {
                self.stats.record_deletes(removed);
                *self.entry_count.lock() = Some((self.clock.now(), 0));
                debug!(backend = BACKEND, prefix = %self.prefix, removed, "Cleared remote cache");
                true
            }
            Err(err) => {
                self.absorb("clear", &prefix, &err);
                false
            }
        }
    }

    fn stats(&self) -> BackendStats {
        let mut stats = self.stats.snapshot(BACKEND);
        stats.entries = self.entry_count();
        stats
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for cache::backend::remote.
    use serde_json::json;

    use super::*;
    use crate::clock::MockClock;
    use crate::testing::MockRemoteStore;

    type TestBackend = RemoteBackend<Arc<MockRemoteStore>, MockClock>;

    fn backend(store: &Arc<MockRemoteStore>, clock: &MockClock) -> TestBackend {
        RemoteBackend::with_clock(Arc::clone(store), "test", clock.clone())
    }

    /// Validates `RemoteBackend::set` behavior for the namespaced round trip
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the value is stored under `prefix:key`.
    /// - Confirms a nested value reads back equal.
    /// - Confirms the server-side TTL matches the entry TTL.
    #[test]
    fn test_round_trip_under_prefix() {
        let store = Arc::new(MockRemoteStore::new());
        let clock = MockClock::new();
        let remote = backend(&store, &clock);
        let key = CacheKey::from("k1");
        let value = json!({"senses": [{"gloss": "x"}], "n": 2});

        let entry = CacheEntry::new_at(value.clone(), Duration::from_secs(60), clock.utc_now());
        assert!(remote.set(&key, entry));
        assert!(store.contains_key("test:k1"));
        assert_eq!(store.ttl_of("test:k1"), Some(Duration::from_secs(60)));
        assert_eq!(remote.get(&key).map(|e| e.value), Some(value));
        assert_eq!(remote.stats().entries, 1);
    }

    /// Validates `RemoteBackend::get` behavior for the local expiry
    /// revalidation scenario.
    ///
    /// Assertions:
    /// - Ensures an entry past its embedded TTL is a miss even though the
    ///   store still holds it.
    /// - Confirms the stale blob is deleted from the store.
    #[test]
    fn test_expired_entry_revalidated_locally() {
        let store = Arc::new(MockRemoteStore::new());
        let clock = MockClock::new();
        let remote = backend(&store, &clock);
        let key = CacheKey::from("stale");

        remote.set(&key, CacheEntry::new_at(json!(1), Duration::from_secs(5), clock.utc_now()));
        clock.advance_secs(6);

        assert!(remote.get(&key).is_none());
        assert!(!store.contains_key("test:stale"));
        let stats = remote.stats();
        assert_eq!((stats.misses, stats.expirations), (1, 1));
    }

    /// Validates `RemoteBackend` behavior for the failure isolation
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures every operation degrades to a miss or `false`.
    /// - Confirms each failure increments the error counter.
    #[test]
    fn test_store_failures_degrade_to_miss() {
        let store = Arc::new(MockRemoteStore::new());
        let clock = MockClock::new();
        let remote = backend(&store, &clock);
        let key = CacheKey::from("k");
        store.set_failing(true);

        assert!(!remote.set(&key, CacheEntry::new(json!(1), Duration::from_secs(60))));
        assert!(remote.get(&key).is_none());
        assert!(!remote.delete(&key));
        assert!(!remote.clear());

        let stats = remote.stats();
        assert_eq!(stats.errors, 4);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 0);
    }

    /// Validates `RemoteBackend::get` behavior for the corrupt payload
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures an undecodable blob is a miss counted as an error.
    #[test]
    fn test_corrupt_payload_is_miss() {
        let store = Arc::new(MockRemoteStore::new());
        let clock = MockClock::new();
        let remote = backend(&store, &clock);
        store.set("test:junk", b"not an entry", None).unwrap();

        assert!(remote.get(&CacheKey::from("junk")).is_none());
        assert_eq!(remote.stats().errors, 1);
    }

    /// Validates `RemoteBackend::clear` behavior for the prefix isolation
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms only keys under this backend's prefix are removed.
    #[test]
    fn test_clear_only_touches_own_prefix() {
        let store = Arc::new(MockRemoteStore::new());
        let clock = MockClock::new();
        let remote = backend(&store, &clock);
        store.set("other:k", b"keep", None).unwrap();
        remote.set(&CacheKey::from("a"), CacheEntry::new(json!(1), Duration::from_secs(60)));
        remote.set(&CacheKey::from("b"), CacheEntry::new(json!(2), Duration::from_secs(60)));

        assert!(remote.clear());
        assert!(store.contains_key("other:k"));
        assert_eq!(remote.stats().entries, 0);
        assert_eq!(remote.stats().deletes, 2);
    }

    /// Validates `RemoteBackend::stats` behavior for the cached entry count
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures repeated stats calls within the refresh window issue no
    ///   store commands.
    /// - Confirms the count is rescanned once the window has passed.
    #[test]
    fn test_stats_reuses_entry_count_within_window() {
        let store = Arc::new(MockRemoteStore::new());
        let clock = MockClock::new();
        let remote = backend(&store, &clock);
        remote.set(&CacheKey::from("a"), CacheEntry::new(json!(1), Duration::from_secs(600)));

        assert_eq!(remote.stats().entries, 1);
        let calls = store.calls();
        remote.set(&CacheKey::from("b"), CacheEntry::new(json!(2), Duration::from_secs(600)));
        let calls_after_set = store.calls();
        assert_eq!(calls_after_set, calls + 1);

        for _ in 0..5 {
            assert_eq!(remote.stats().entries, 1);
        }
        assert_eq!(store.calls(), calls_after_set);

        clock.advance_secs(31);
        assert_eq!(remote.stats().entries, 2);
        assert_eq!(store.calls(), calls_after_set + 1);
    }

    /// Validates `scan_pattern` behavior for the glob escaping scenario.
    ///
    /// Assertions:
    /// - Confirms glob metacharacters in a prefix are escaped.
    #[test]
    fn test_scan_pattern_escapes_globs() {
        assert_eq!(scan_pattern("app:"), "app:*");
        assert_eq!(scan_pattern("a*b?[c]:"), r"a\*b\?\[c\]:*");
    }

    /// Validates `RedisStore::new` behavior for the lazy connection
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures construction with an unreachable URL does not connect.
    /// - Ensures the first command fails as a retryable error.
    #[test]
    fn test_redis_store_connects_lazily() {
        let store = RedisStore::new("redis://127.0.0.1:1", Duration::from_millis(50));
        assert!(format!("{store:?}").contains("idle_connections: 0"));

        let err = store.get("k").unwrap_err();
        assert!(err.is_retryable());
    }

    /// Validates `RemoteBackend` behavior for the silent server scenario.
    ///
    /// Assertions:
    /// - Ensures concurrent reads against a server that accepts but never
    ///   replies all return misses within a bounded time.
    /// - Ensures a read issued while a connect is still pending fails fast.
    /// - Confirms every failed read is counted as an error.
    #[test]
    fn test_silent_server_degrades_within_deadline() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("redis://{}", listener.local_addr().unwrap());
        let remote = Arc::new(RemoteBackend::connect_lazy(url, "p", Duration::from_millis(100)));

        let (tx, rx) = mpsc::channel();
        for _ in 0..8 {
            let remote = Arc::clone(&remote);
            let tx = tx.clone();
            thread::spawn(move || {
                let hit = remote.get(&CacheKey::from("k"));
                let _ = tx.send(hit.is_none());
            });
        }
        drop(tx);

        let deadline = Instant::now() + Duration::from_secs(5);
        for _ in 0..8 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            assert_eq!(rx.recv_timeout(remaining), Ok(true));
        }

        let started = Instant::now();
        assert!(remote.get(&CacheKey::from("k")).is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(remote.stats().errors, 9);
        drop(listener);
    }
}
