use baitline_core::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// CacheStats
// ---------------------------------------------------------------------------

/// Point-in-time counters of a [`TtlCache`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or `0.0` before the first lookup.
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
}

// ---------------------------------------------------------------------------
// TtlCache
// ---------------------------------------------------------------------------

struct Entry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
    ttl: Duration,
    tick: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Recency order: lowest tick is the least recently used key.
    order: BTreeMap<u64, K>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry)
    }

    fn evict_lru(&mut self) {
        if let Some((_, key)) = self.order.pop_first() {
            self.entries.remove(&key);
            self.evictions += 1;
        }
    }
}

/// A bounded key/value cache with per-entry TTL and LRU eviction.
///
/// Expiry is lazy: an entry is only dropped when a lookup finds it stale.
/// Every operation runs under a single non-async lock, so counters and
/// eviction order always agree with each other.
pub struct TtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                tick: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
            capacity: capacity.max(1),
            default_ttl,
            clock,
        }
    }

    /// Look up `key`, refreshing its recency on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => is_expired(entry.inserted_at, entry.ttl, now),
        };

        if expired {
            inner.remove(key);
            inner.expirations += 1;
            inner.misses += 1;
            return None;
        }

        let tick = inner.next_tick();
        let Inner { entries, order, .. } = &mut *inner;
        let entry = entries.get_mut(key)?;
        order.remove(&entry.tick);
        order.insert(tick, key.clone());
        entry.tick = tick;
        let value = entry.value.clone();
        inner.hits += 1;
        Some(value)
    }

    /// Insert with the cache's default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Insert or replace `key`, evicting the least recently used entry when
    /// a new key would exceed capacity.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if inner.remove(&key).is_none() && inner.entries.len() >= self.capacity {
            inner.evict_lru();
        }

        let tick = inner.next_tick();
        inner.order.insert(tick, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                ttl,
                tick,
            },
        );
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: &K) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
        inner.expirations = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            inner.hits as f64 / lookups as f64
        };
        CacheStats {
            size: inner.entries.len(),
            capacity: self.capacity,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }
}

fn is_expired(inserted_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    // A clock that moved backwards yields a negative age; treat it as fresh.
    match (now - inserted_at).to_std() {
        Ok(age) => age >= ttl,
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use baitline_core::ManualClock;

    fn cache(capacity: usize) -> (TtlCache<String, u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = TtlCache::new(capacity, Duration::from_secs(300), clock.clone());
        (cache, clock)
    }

    #[test]
    fn get_after_set_hits() {
        let (cache, _) = cache(4);
        cache.insert("a".into(), 1);
        assert_eq!(cache.get(&"a".into()), Some(1));
        assert_eq!(cache.get(&"b".into()), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let (cache, _) = cache(2);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);

        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get(&"a".into()), Some(1));
        cache.insert("c".into(), 3);

        assert_eq!(cache.get(&"a".into()), Some(1));
        assert_eq!(cache.get(&"b".into()), None);
        assert_eq!(cache.get(&"c".into()), Some(3));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn overwriting_existing_key_does_not_evict() {
        let (cache, _) = cache(2);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        cache.insert("a".into(), 10);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a".into()), Some(10));
        assert_eq!(cache.get(&"b".into()), Some(2));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn expired_entry_is_a_miss_and_removed() {
        let (cache, clock) = cache(4);
        cache.set("a".into(), 1, Duration::from_secs(60));

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get(&"a".into()), Some(1));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&"a".into()), None);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn set_resets_ttl() {
        let (cache, clock) = cache(4);
        cache.set("a".into(), 1, Duration::from_secs(60));
        clock.advance(Duration::from_secs(50));
        cache.set("a".into(), 2, Duration::from_secs(60));
        clock.advance(Duration::from_secs(50));
        assert_eq!(cache.get(&"a".into()), Some(2));
    }

    #[test]
    fn delete_and_clear() {
        let (cache, _) = cache(4);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        let _ = cache.get(&"a".into());

        assert!(cache.delete(&"a".into()));
        assert!(!cache.delete(&"a".into()));

        cache.clear();
        let stats = cache.stats();
        assert!(cache.is_empty());
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (cache, _) = cache(0);
        cache.insert("a".into(), 1);
        assert_eq!(cache.stats().capacity, 1);
        assert_eq!(cache.get(&"a".into()), Some(1));
    }
}
