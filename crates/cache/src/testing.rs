//! Test doubles for the remote tier
//!
//! [`MockRemoteStore`] is an in-memory [`RemoteStore`] with failure
//! injection, so remote and hybrid behavior can be exercised without a
//! running server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::cache::backend::RemoteStore;
use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    ttl: Option<Duration>,
}

/// In-memory remote store; server-side TTLs are recorded, never enforced
#[derive(Debug, Default)]
pub struct MockRemoteStore {
    data: Mutex<HashMap<String, StoredValue>>,
    failing: AtomicBool,
    calls: AtomicU64,
}

impl MockRemoteStore {
    /// Create an empty, healthy store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or recover) as an unreachable server
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Whether a raw (already prefixed) key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    /// Server-side TTL recorded for a raw key
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.data.lock().get(key).and_then(|stored| stored.ttl)
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of protocol calls received, failed ones included
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable("remote", "connection refused (simulated)"));
        }
        Ok(())
    }
}

impl RemoteStore for MockRemoteStore {
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.data.lock().get(key).map(|stored| stored.bytes.clone()))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        self.check()?;
        self.data.lock().insert(key.to_string(), StoredValue { bytes: value.to_vec(), ttl });
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        Ok(self.data.lock().remove(key).is_some())
    }

    fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
        self.check()?;
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|key, _| !key.starts_with(prefix));
        Ok((before - data.len()) as u64)
    }

    fn count_prefix(&self, prefix: &str) -> CacheResult<u64> {
        self.check()?;
        Ok(self.data.lock().keys().filter(|key| key.starts_with(prefix)).count() as u64)
    }
}
