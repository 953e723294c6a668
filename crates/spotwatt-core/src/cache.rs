//! Bounded in-memory TTL cache shared by the HTTP client and the price
//! orchestrator.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default upper bound on stored entries.
pub const DEFAULT_MAX_ENTRIES: usize = 256;

/// Defines the behavior of the in-memory cache for an API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present;
    /// otherwise, fetch from the network and write the response to the cache. (Default)
    #[default]
    Use,
    /// Always fetch from the network, bypassing any cached entry,
    /// and write the new response to the cache.
    Refresh,
    /// Always fetch from the network and do not read from or write to the cache.
    Bypass,
}

impl CacheMode {
    pub const fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    pub const fn writes(self) -> bool {
        !matches!(self, Self::Bypass)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    /// Insertion sequence; eviction order on overflow.
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    map: HashMap<String, CacheEntry<V>>,
    next_seq: u64,
}

impl<V: Clone> CacheInner<V> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            next_seq: 0,
        }
    }

    fn get(&mut self, key: &str, now: Instant) -> Option<V> {
        let live = self.map.get(key)?.is_live(now);
        if live {
            self.map.get(key).map(|entry| entry.value.clone())
        } else {
            self.map.remove(key);
            None
        }
    }

    fn put(&mut self, key: String, value: V, expires_at: Instant, now: Instant) {
        let seq = match self.map.get(&key) {
            Some(existing) if existing.is_live(now) => existing.seq,
            _ => {
                let seq = self.next_seq;
                self.next_seq = self.next_seq.wrapping_add(1);
                seq
            }
        };
        self.map.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                seq,
            },
        );
    }

    fn enforce_bound(&mut self, max_entries: usize, now: Instant) {
        if self.map.len() <= max_entries {
            return;
        }

        self.clear_expired(now);

        while self.map.len() > max_entries {
            let oldest = self
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    self.map.remove(&key);
                }
                None => break,
            }
        }
    }

    fn clear_expired(&mut self, now: Instant) {
        self.map.retain(|_, entry| entry.is_live(now));
    }
}

/// Thread-safe expiring key/value store with a size bound.
///
/// Expired entries are treated as absent and removed when touched; overflow
/// purges expired entries first and then evicts in insertion order (not LRU).
/// No background sweeper runs.
#[derive(Debug)]
pub struct TtlCache<V> {
    inner: Mutex<CacheInner<V>>,
    max_entries: usize,
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache holding at most `max_entries` values (minimum one).
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::new()),
            max_entries: max_entries.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        // A panic while holding the guard leaves at worst a stale entry.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get a cached value for the given key if it exists and hasn't expired.
    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key, Instant::now())
    }

    /// Store `value` for `ttl`. A zero TTL means "not cacheable" and is a no-op.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        let now = Instant::now();
        let Some(expires_at) = now.checked_add(ttl) else {
            return;
        };

        let mut inner = self.lock();
        inner.put(key.into(), value, expires_at, now);
        inner.enforce_bound(self.max_entries, now);
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock().map.remove(key).map(|entry| entry.value)
    }

    /// Remove expired entries from the cache.
    pub fn clear_expired(&self) {
        self.lock().clear_expired(Instant::now());
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        self.lock().map.clear();
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries that would currently be served.
    pub fn live_len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_basic_operations() {
        let cache = TtlCache::new(8);

        assert!(cache.get("key1").is_none());

        cache.set("key1", "value1".to_string(), Duration::from_secs(60));
        assert_eq!(cache.get("key1"), Some("value1".to_string()));

        cache.set("key1", "value2".to_string(), Duration::from_secs(60));
        assert_eq!(cache.get("key1"), Some("value2".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_expiration_evicts_on_touch() {
        let cache = TtlCache::new(8);

        cache.set("key1", 1_u32, Duration::from_millis(20));
        assert!(cache.get("key1").is_some());

        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.len(), 1);
        assert!(cache.get("key1").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_zero_ttl_is_not_cacheable() {
        let cache = TtlCache::new(8);

        cache.set("key1", 1_u32, Duration::ZERO);
        assert!(cache.get("key1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overflow_evicts_in_insertion_order() {
        let cache = TtlCache::new(3);

        for index in 0..4_u32 {
            cache.set(format!("key{index}"), index, Duration::from_secs(60));
        }

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.live_len(), 3);
        assert!(cache.get("key0").is_none());
        assert_eq!(cache.get("key3"), Some(3));
    }

    #[test]
    fn test_overflow_prefers_expired_entries() {
        let cache = TtlCache::new(3);

        cache.set("old", 0_u32, Duration::from_secs(60));
        cache.set("short", 1_u32, Duration::from_millis(10));
        cache.set("mid", 2_u32, Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(30));

        cache.set("new", 3_u32, Duration::from_secs(60));

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("old"), Some(0));
        assert_eq!(cache.get("mid"), Some(2));
        assert_eq!(cache.get("new"), Some(3));
        assert!(cache.get("short").is_none());
    }

    #[test]
    fn test_overwrite_keeps_insertion_position() {
        let cache = TtlCache::new(2);

        cache.set("first", 1_u32, Duration::from_secs(60));
        cache.set("second", 2_u32, Duration::from_secs(60));
        cache.set("first", 10_u32, Duration::from_secs(60));
        cache.set("third", 3_u32, Duration::from_secs(60));

        assert!(cache.get("first").is_none());
        assert_eq!(cache.get("second"), Some(2));
        assert_eq!(cache.get("third"), Some(3));
    }

    #[test]
    fn test_clear_expired_and_clear_all() {
        let cache = TtlCache::new(8);

        cache.set("key1", 1_u32, Duration::from_millis(10));
        cache.set("key2", 2_u32, Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(30));

        cache.clear_expired();
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_mode_default() {
        let mode: CacheMode = Default::default();
        assert_eq!(mode, CacheMode::Use);
        assert!(mode.reads() && mode.writes());
        assert!(!CacheMode::Refresh.reads());
        assert!(!CacheMode::Bypass.writes());
    }
}
