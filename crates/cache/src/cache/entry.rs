//! Cache entry with expiry and access metadata
//!
//! An entry is the unit every tier stores and replaces. It carries its own
//! creation time and TTL so that any reader (including a different process
//! reading the remote tier) can re-validate expiry locally.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};

/// A cached value plus the metadata needed for expiry and LRU decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Opaque payload
    pub value: Value,
    /// When the value was written (resets the TTL clock)
    pub created_at: DateTime<Utc>,
    /// Lifetime in seconds, measured from `created_at`
    pub ttl_seconds: u64,
    /// Number of reads served from this entry
    pub access_count: u64,
    /// Last read (or write) time
    pub last_accessed_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry stamped with the system clock
    pub fn new(value: Value, ttl: Duration) -> Self {
        Self::new_at(value, ttl, SystemClock.utc_now())
    }

    /// Create an entry stamped with an explicit creation time
    ///
    /// TTLs are kept in whole seconds; a fractional part rounds up so a
    /// short positive TTL never becomes an already-expired entry.
    pub fn new_at(value: Value, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            value,
            created_at: now,
            ttl_seconds: ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0),
            access_count: 0,
            last_accessed_at: now,
        }
    }

    /// Time-to-live as a `Duration`
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Instant after which the entry is expired
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::seconds(i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX));
        self.created_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// `true` once `now > created_at + ttl`
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemClock.utc_now())
    }

    /// Expiry check against an explicit time
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// Record a read: bump the access count and refresh `last_accessed_at`
    pub fn touch(&mut self) {
        self.touch_at(SystemClock.utc_now());
    }

    /// Record a read at an explicit time
    pub fn touch_at(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
    }

    /// Time since creation
    pub fn age(&self) -> Duration {
        self.age_at(SystemClock.utc_now())
    }

    /// Time since creation, measured at `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Seconds of life left at `now`, zero once expired
    pub fn remaining_ttl_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at() - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Best-effort payload size; encoding failures report zero
    pub fn estimated_size(&self) -> usize {
        serde_json::to_vec(&self.value).map(|bytes| bytes.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for cache::entry.
    use serde_json::json;

    use super::*;
    use crate::clock::MockClock;

    /// Validates `CacheEntry::new_at` behavior for the sub-second ttl
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms a 500ms TTL rounds up to one second and is still valid
    ///   right after creation.
    /// - Confirms whole-second and zero TTLs are kept as given.
    #[test]
    fn test_sub_second_ttl_rounds_up() {
        let clock = MockClock::new();
        let short = CacheEntry::new_at(json!(1), Duration::from_millis(500), clock.utc_now());
        assert_eq!(short.ttl_seconds, 1);
        clock.advance(Duration::from_millis(200));
        assert!(!short.is_expired_at(clock.utc_now()));

        let exact = CacheEntry::new_at(json!(1), Duration::from_secs(3), clock.utc_now());
        assert_eq!(exact.ttl_seconds, 3);
        let zero = CacheEntry::new_at(json!(1), Duration::ZERO, clock.utc_now());
        assert_eq!(zero.ttl_seconds, 0);
        assert_eq!(
            CacheEntry::new_at(json!(1), Duration::from_millis(1500), clock.utc_now()).ttl(),
            Duration::from_secs(2)
        );
    }

    /// Validates `CacheEntry::is_expired_at` behavior for the expiry
    /// monotonicity scenario.
    ///
    /// Assertions:
    /// - Ensures a fresh entry is not expired.
    /// - Ensures the boundary instant `created_at + ttl` is still valid.
    /// - Ensures the entry is expired after the TTL and stays expired.
    #[test]
    fn test_expiry_monotonic() {
        let clock = MockClock::new();
        let entry = CacheEntry::new_at(json!("v"), Duration::from_secs(10), clock.utc_now());

        assert!(!entry.is_expired_at(clock.utc_now()));

        clock.advance_secs(10);
        assert!(!entry.is_expired_at(clock.utc_now()));

        clock.advance(Duration::from_millis(1));
        assert!(entry.is_expired_at(clock.utc_now()));

        clock.advance_secs(3600);
        assert!(entry.is_expired_at(clock.utc_now()));
    }

    /// Validates `CacheEntry::touch_at` behavior for the access metadata
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms `access_count` increments per touch.
    /// - Confirms `last_accessed_at` advances while `created_at` stays put.
    #[test]
    fn test_touch_updates_access_metadata() {
        let clock = MockClock::new();
        let mut entry = CacheEntry::new_at(json!(1), Duration::from_secs(60), clock.utc_now());
        let created = entry.created_at;

        clock.advance_secs(5);
        entry.touch_at(clock.utc_now());
        entry.touch_at(clock.utc_now());

        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.created_at, created);
        assert_eq!(entry.last_accessed_at, clock.utc_now());
    }

    /// Validates `CacheEntry::age_at` behavior for the age and remaining
    /// ttl scenario.
    ///
    /// Assertions:
    /// - Confirms age equals the elapsed mock time.
    /// - Confirms remaining TTL shrinks and saturates at zero.
    #[test]
    fn test_age_and_remaining_ttl() {
        let clock = MockClock::new();
        let entry = CacheEntry::new_at(json!(null), Duration::from_secs(30), clock.utc_now());

        clock.advance_secs(12);
        assert_eq!(entry.age_at(clock.utc_now()), Duration::from_secs(12));
        assert_eq!(entry.remaining_ttl_at(clock.utc_now()), Duration::from_secs(18));

        clock.advance_secs(100);
        assert_eq!(entry.remaining_ttl_at(clock.utc_now()), Duration::ZERO);
    }

    /// Validates serde behavior for the nested payload scenario.
    ///
    /// Assertions:
    /// - Confirms an entry with nested structures survives JSON encoding.
    #[test]
    fn test_entry_serde_preserves_nested_value() {
        let value = json!({"term": "lemma", "senses": [{"n": 1, "tags": ["a", "b"]}]});
        let entry = CacheEntry::new(value.clone(), Duration::from_secs(5));

        let encoded = serde_json::to_string(&entry).unwrap();
        let decoded: CacheEntry = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.value, value);
        assert_eq!(decoded.ttl_seconds, 5);
        assert!(entry.estimated_size() > 0);
    }
}
