//! Suggestion caching with TTL expiry and LRU eviction
//!
//! # Architecture
//!
//! ```text
//! Completion request
//!     ↓
//! Hash (language, cursor, line blocks) into a CacheKey
//!     ↓
//! Query TtlCache by key
//!     ├─ HIT (fresh)   → return cached suggestion, record hit
//!     ├─ HIT (expired) → drop entry, treat as miss
//!     └─ MISS          → debounced remote call, store result
//! ```
//!
//! # Invalidation
//!
//! Every entry carries its own expiry; an entry is never observable past
//! it. High-confidence suggestions receive long TTLs and low-confidence
//! ones short TTLs (banding lives in [`crate::config::EngineConfig`]).
//! Capacity overflow evicts the least recently used entry.
//!
//! # Thread Safety
//!
//! The `lru::LruCache` is wrapped in `parking_lot::RwLock`; lookups take
//! the write lock because a hit reorders the LRU list. Statistics are a
//! separate lock so snapshot reads never touch the entry map.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::RwLock;

/// Cached value plus its own lifetime.
#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_queries: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub current_size: usize,
    pub max_capacity: usize,
}

impl CacheStats {
    /// Hit rate in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_queries as f64
        }
    }
}

/// Thread-safe, size- and time-bounded key→value store.
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash + Clone, V: Clone> {
    entries: RwLock<LruCache<K, CacheEntry<V>>>,
    stats: RwLock<CacheStats>,
    default_ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("capacity is at least 1"),
            )),
            stats: RwLock::new(CacheStats {
                max_capacity: capacity,
                ..Default::default()
            }),
            default_ttl,
        }
    }

    /// Look up a key. Expired entries are dropped on observation and
    /// reported as misses.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let mut stats = self.stats.write();
        stats.total_queries += 1;

        // Peek first so the expired pop does not fight the entry borrow.
        let expired = match entries.peek(key) {
            None => {
                stats.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            entries.pop(key);
            stats.expirations += 1;
            stats.misses += 1;
            stats.current_size = entries.len();
            return None;
        }

        // A fresh hit promotes the entry in the LRU order.
        let value = entries.get(key).map(|entry| entry.value.clone());
        stats.hits += 1;
        value
    }

    /// Insert with an explicit TTL, or the cache default when `None`.
    pub fn insert(&self, key: K, value: V, ttl: Option<Duration>) {
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
        let mut entries = self.entries.write();
        let mut stats = self.stats.write();
        // push returns the displaced pair both on key overwrite and on LRU
        // overflow; only the latter counts as an eviction.
        if let Some((displaced_key, _)) = entries.push(key.clone(), entry) {
            if displaced_key != key {
                stats.evictions += 1;
            }
        }
        stats.current_size = entries.len();
    }

    /// Drop every expired entry. Called from the periodic cleanup task.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key)
            .cloned()
            .collect();
        let purged = expired.len();
        for key in expired {
            entries.pop(&key);
        }

        let mut stats = self.stats.write();
        stats.expirations += purged as u64;
        stats.current_size = entries.len();
        purged
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        self.stats.write().current_size = 0;
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn get_after_insert_until_ttl_elapses() {
        let cache: TtlCache<String, u32> =
            TtlCache::new(10, Duration::from_millis(40));
        cache.insert("a".to_string(), 1, None);

        assert_eq!(cache.get(&"a".to_string()), Some(1));
        thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"a".to_string()), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn per_entry_ttl_overrides_default() {
        let cache: TtlCache<&str, u32> = TtlCache::new(10, Duration::from_secs(600));
        cache.insert("short", 1, Some(Duration::from_millis(30)));
        cache.insert("long", 2, None);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(cache.get(&"short"), None);
        assert_eq!(cache.get(&"long"), Some(2));
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let cache: TtlCache<u32, u32> = TtlCache::new(2, Duration::from_secs(60));
        cache.insert(1, 10, None);
        cache.insert(2, 20, None);
        // Touch 1 so 2 becomes least recently used.
        assert_eq!(cache.get(&1), Some(10));
        cache.insert(3, 30, None);

        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn purge_expired_removes_only_stale_entries() {
        let cache: TtlCache<&str, u32> = TtlCache::new(10, Duration::from_secs(60));
        cache.insert("stale", 1, Some(Duration::from_millis(10)));
        cache.insert("fresh", 2, None);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"fresh"), Some(2));
    }

    #[test]
    fn clear_empties_cache() {
        let cache: TtlCache<u32, u32> = TtlCache::new(4, Duration::from_secs(60));
        cache.insert(1, 1, None);
        cache.insert(2, 2, None);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().current_size, 0);
    }

    #[test]
    fn hit_rate_reflects_traffic() {
        let cache: TtlCache<u32, u32> = TtlCache::new(4, Duration::from_secs(60));
        cache.insert(1, 1, None);
        let _ = cache.get(&1);
        let _ = cache.get(&1);
        let _ = cache.get(&2);
        assert!((cache.stats().hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn concurrent_access_from_multiple_keys() {
        use std::sync::Arc;

        let cache: Arc<TtlCache<u32, u32>> =
            Arc::new(TtlCache::new(64, Duration::from_secs(60)));
        let mut handles = Vec::new();
        for t in 0..8u32 {
            let cache = cache.clone();
            handles.push(thread::spawn(move || {
                for i in 0..100u32 {
                    let key = t * 1000 + i;
                    cache.insert(key, i, None);
                    assert!(cache.get(&key).is_some() || cache.len() <= 64);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
