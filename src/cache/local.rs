//! In-process cache backend.
//!
//! One bounded LRU store per [`CacheKind`], each behind its own mutex so a busy
//! kind never blocks another. Entries carry their insertion instant and TTL and
//! are treated as absent once `elapsed >= ttl`.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use tokio::time::Instant;

use super::backend::{CacheBackend, CacheError, CacheStats, KindStats};
use super::config::CacheConfig;
use super::keys::{CacheKey, CacheKind};
use super::lock::mutex_lock;
use super::value::CacheValue;

const SOURCE: &str = "cache::local";
const METRIC_CACHE_EVICT_TOTAL: &str = "watchlazy_cache_evict_total";

struct Entry {
    value: CacheValue,
    inserted_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

type KindStore = Mutex<LruCache<String, Entry>>;

pub struct LocalCache {
    stores: [KindStore; 4],
}

impl LocalCache {
    pub fn new(config: &CacheConfig) -> Self {
        let store = |kind: CacheKind| Mutex::new(LruCache::new(config.capacity_non_zero(kind)));
        Self {
            stores: [
                store(CacheKind::MovieRelated),
                store(CacheKind::TopRated),
                store(CacheKind::Browse),
                store(CacheKind::Search),
            ],
        }
    }

    fn store(&self, kind: CacheKind) -> &KindStore {
        &self.stores[kind.index()]
    }

    // ========================================================================
    // Synchronous operations
    // ========================================================================

    pub fn get_entry(&self, key: &CacheKey) -> Option<CacheValue> {
        let mut store = mutex_lock(self.store(key.kind()), SOURCE, "get");
        let now = Instant::now();
        let expired = match store.get(key.key()) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            store.pop(key.key());
        }
        None
    }

    pub fn set_entry(&self, key: &CacheKey, value: CacheValue, ttl: Duration) {
        let entry = Entry {
            value,
            inserted_at: Instant::now(),
            ttl,
        };
        let evicted = mutex_lock(self.store(key.kind()), SOURCE, "set")
            .push(key.key().to_string(), entry);

        if let Some((evicted_key, _)) = evicted
            && evicted_key != key.key()
        {
            counter!(METRIC_CACHE_EVICT_TOTAL, "kind" => key.kind().as_str()).increment(1);
        }
    }

    pub fn clear(&self) {
        for kind in CacheKind::ALL {
            mutex_lock(self.store(kind), SOURCE, "clear").clear();
        }
    }

    /// Number of live (unexpired) entries for `kind`.
    pub fn live_len(&self, kind: CacheKind) -> usize {
        let store = mutex_lock(self.store(kind), SOURCE, "live_len");
        let now = Instant::now();
        store.iter().filter(|(_, entry)| !entry.is_expired(now)).count()
    }

    pub fn capacity(&self, kind: CacheKind) -> usize {
        mutex_lock(self.store(kind), SOURCE, "capacity").cap().get()
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        self.get_entry(key)
    }

    async fn set(&self, key: &CacheKey, value: CacheValue, ttl: Duration) {
        self.set_entry(key, value, ttl);
    }

    async fn invalidate_all(&self) -> Result<(), CacheError> {
        self.clear();
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            backend: self.name(),
            connected: true,
            kinds: CacheKind::ALL
                .into_iter()
                .map(|kind| KindStats {
                    kind: kind.as_str(),
                    size: self.live_len(kind),
                    capacity: Some(self.capacity(kind)),
                })
                .collect(),
        }
    }

    async fn is_connected(&self) -> bool {
        true
    }
}
