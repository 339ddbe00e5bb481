//! Bounded LRU cache with per-entry TTL.
//!
//! `get` refreshes recency and drops expired entries on access; `set`
//! evicts the least-recently-used key at capacity. A background sweep task
//! removes expired entries between accesses.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

struct Inner<K, V> {
    map: HashMap<K, Entry<V>>,
    // Keys in LRU order, front = least recently used.
    order: VecDeque<K>,
}

/// Bounded LRU cache with TTL expiry.
pub struct TtlCache<K, V> {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a cache holding at most `capacity` entries, each valid for `ttl`.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Look up a key, refreshing its recency. Expired entries are removed
    /// and reported as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().expect("cache lock");

        let expired = match inner.map.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            inner.map.remove(key);
            inner.order.retain(|k| k != key);
            return None;
        }

        // Move to most-recently-used.
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.clone());
        inner.map.get(key).map(|e| e.value.clone())
    }

    /// Insert or replace a value, evicting the LRU entry at capacity.
    pub fn set(&self, key: K, value: V) {
        let mut inner = self.inner.lock().expect("cache lock");

        if inner.map.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        } else if inner.map.len() >= self.capacity {
            if let Some(lru) = inner.order.pop_front() {
                inner.map.remove(&lru);
            }
        }

        inner.map.insert(
            key.clone(),
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        inner.order.push_back(key);
    }

    /// Remove a key if present.
    pub fn remove(&self, key: &K) {
        let mut inner = self.inner.lock().expect("cache lock");
        if inner.map.remove(key).is_some() {
            inner.order.retain(|k| k != key);
        }
    }

    /// Number of live entries (including not-yet-swept expired ones).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").map.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all expired entries.
    pub fn sweep(&self) {
        let mut inner = self.inner.lock().expect("cache lock");
        let ttl = self.ttl;
        inner.map.retain(|_, e| e.inserted_at.elapsed() <= ttl);
        let live: Vec<K> = inner.map.keys().cloned().collect();
        inner.order.retain(|k| live.contains(k));
    }

    /// Interval at which the background sweeper runs.
    pub fn sweep_interval(&self) -> Duration {
        self.ttl.min(Duration::from_secs(60))
    }

    /// Start the background sweep for a shared cache.
    ///
    /// The task holds only a weak handle and exits once the cache is
    /// dropped. Outside a tokio runtime this is a no-op; expiry-on-access
    /// still applies.
    pub fn start_sweeper(cache: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let period = cache.sweep_interval();
        let weak = Arc::downgrade(cache);
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => cache.sweep(),
                    None => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> TtlCache<String, u32> {
        TtlCache::new(capacity, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn insert_beyond_capacity_evicts_the_oldest() {
        let c = cache(3);
        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            c.set((*key).to_string(), i as u32);
        }

        assert!(c.get(&"a".to_string()).is_none(), "earliest insert evicted");
        assert_eq!(c.get(&"d".to_string()), Some(3));
        assert_eq!(c.len(), 3);
    }

    #[tokio::test]
    async fn get_refreshes_recency_so_eviction_skips_it() {
        let c = cache(3);
        c.set("a".to_string(), 1);
        c.set("b".to_string(), 2);
        c.set("c".to_string(), 3);

        // Touch "a" so "b" becomes the LRU entry.
        assert_eq!(c.get(&"a".to_string()), Some(1));
        c.set("d".to_string(), 4);

        assert_eq!(c.get(&"a".to_string()), Some(1));
        assert!(c.get(&"b".to_string()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let c: TtlCache<String, u32> = TtlCache::new(10, Duration::from_secs(5));
        c.set("k".to_string(), 7);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(c.get(&"k".to_string()).is_none());
        assert_eq!(c.len(), 0, "expired entry removed on access");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_expired_entries_without_access() {
        let c: TtlCache<String, u32> = TtlCache::new(10, Duration::from_secs(5));
        c.set("k".to_string(), 7);

        tokio::time::advance(Duration::from_secs(6)).await;
        c.sweep();
        assert_eq!(c.len(), 0);
    }

    #[tokio::test]
    async fn replacing_a_key_does_not_grow_the_cache() {
        let c = cache(2);
        c.set("a".to_string(), 1);
        c.set("a".to_string(), 2);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(&"a".to_string()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_stops_when_the_cache_is_dropped() {
        let c: Arc<TtlCache<String, u32>> = Arc::new(TtlCache::new(10, Duration::from_secs(5)));
        TtlCache::start_sweeper(&c);
        c.set("k".to_string(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        // Yield so the sweeper tick runs under the paused clock.
        tokio::task::yield_now().await;
        assert_eq!(c.len(), 0, "sweeper removed the expired entry");

        let weak = Arc::downgrade(&c);
        drop(c);
        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(weak.upgrade().is_none(), "sweeper holds no strong handle");
    }

    #[test]
    fn sweep_interval_is_capped_at_a_minute() {
        let short: TtlCache<String, u32> = TtlCache::new(1, Duration::from_secs(5));
        assert_eq!(short.sweep_interval(), Duration::from_secs(5));

        let long: TtlCache<String, u32> = TtlCache::new(1, Duration::from_secs(3600));
        assert_eq!(long.sweep_interval(), Duration::from_secs(60));
    }
}
