// Cache module
// Fixed-capacity arena caches with TTL expiry and hit-count eviction, plus the
// three-cache layer shared by the embedding provider, vector store and engine


use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::RagError;
use crate::config::CacheConfig;
use crate::database::{SearchResult, SourceRef};
use crate::router::EngineKind;

/// blake3 digest identifying a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Hash a sequence of byte fields. Each field is length-prefixed so that
    /// `["ab", "c"]` and `["a", "bc"]` produce different keys.
    #[inline]
    pub fn from_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

struct Slot<V> {
    key: CacheKey,
    value: V,
    created_at: Instant,
    hits: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Fixed-capacity cache stored in a slot arena.
///
/// Entries older than the TTL are removed when read. When a new key arrives
/// at capacity, the entry with the lowest hit count is evicted, oldest first
/// among equals.
pub struct BoundedCache<V> {
    name: &'static str,
    capacity: usize,
    ttl: Duration,
    slots: Vec<Option<Slot<V>>>,
    index: HashMap<CacheKey, usize>,
    free: Vec<usize>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V: Clone> BoundedCache<V> {
    #[inline]
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            capacity,
            ttl,
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            free: Vec::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    #[inline]
    pub fn get(&mut self, key: &CacheKey) -> Option<V> {
        let Some(&slot_index) = self.index.get(key) else {
            self.misses += 1;
            return None;
        };

        let now = Instant::now();
        let expired = self.slots[slot_index]
            .as_ref()
            .is_none_or(|slot| now.duration_since(slot.created_at) > self.ttl);
        if expired {
            self.release(slot_index);
            self.expirations += 1;
            self.misses += 1;
            return None;
        }

        let slot = self.slots[slot_index].as_mut()?;
        slot.hits += 1;
        self.hits += 1;
        Some(slot.value.clone())
    }

    /// Insert or replace `key`. Returns the key evicted to make room, if any.
    #[inline]
    pub fn insert(&mut self, key: CacheKey, value: V) -> Option<CacheKey> {
        let now = Instant::now();

        if let Some(&slot_index) = self.index.get(&key) {
            self.slots[slot_index] = Some(Slot {
                key,
                value,
                created_at: now,
                hits: 0,
            });
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.evict_one()
        } else {
            None
        };

        let slot = Some(Slot {
            key,
            value,
            created_at: now,
            hits: 0,
        });
        let slot_index = match self.free.pop() {
            Some(free_index) => {
                self.slots[free_index] = slot;
                free_index
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot_index);

        evicted
    }

    #[inline]
    pub fn remove(&mut self, key: &CacheKey) -> bool {
        match self.index.get(key) {
            Some(&slot_index) => {
                self.release(slot_index);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.free.clear();
    }

    /// Remove every expired entry; returns how many were removed
    #[inline]
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot_index, slot)| {
                slot.as_ref()
                    .filter(|slot| now.duration_since(slot.created_at) > self.ttl)
                    .map(|_| slot_index)
            })
            .collect();

        for &slot_index in &expired {
            self.release(slot_index);
        }
        self.expirations += expired.len() as u64;
        expired.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name,
            size: self.index.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
        }
    }

    fn evict_one(&mut self) -> Option<CacheKey> {
        let (slot_index, key) = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot_index, slot)| slot.as_ref().map(|slot| (slot_index, slot)))
            .min_by_key(|(_, slot)| (slot.hits, slot.created_at))
            .map(|(slot_index, slot)| (slot_index, slot.key))?;

        self.release(slot_index);
        self.evictions += 1;
        debug!("Evicted entry from {} cache", self.name);
        Some(key)
    }

    fn release(&mut self, slot_index: usize) {
        if let Some(slot) = self.slots[slot_index].take() {
            self.index.remove(&slot.key);
            self.free.push(slot_index);
        }
    }
}

/// Final answer cached per `(mode, normalized query)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseCacheEntry {
    pub response: String,
    pub engine: EngineKind,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    pub ttl: Duration,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheLayerStats {
    pub embeddings: CacheStats,
    pub search: CacheStats,
    pub responses: CacheStats,
}

impl CacheLayerStats {
    #[inline]
    pub fn total_entries(&self) -> usize {
        self.embeddings.size + self.search.size + self.responses.size
    }
}

/// The embedding, search-result and response caches
pub struct CacheLayer {
    embeddings: Mutex<BoundedCache<Vec<f32>>>,
    search: Mutex<BoundedCache<Vec<SearchResult>>>,
    responses: Mutex<BoundedCache<ResponseCacheEntry>>,
    response_ttl: Duration,
}

impl CacheLayer {
    #[inline]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            embeddings: Mutex::new(BoundedCache::new(
                "embedding",
                config.embedding_capacity,
                config.embedding_ttl(),
            )),
            search: Mutex::new(BoundedCache::new(
                "search",
                config.search_capacity,
                config.search_ttl(),
            )),
            responses: Mutex::new(BoundedCache::new(
                "response",
                config.response_capacity,
                config.response_ttl(),
            )),
            response_ttl: config.response_ttl(),
        }
    }

    #[inline]
    pub fn response_ttl(&self) -> Duration {
        self.response_ttl
    }

    #[inline]
    pub fn get_embedding(&self, key: &CacheKey) -> Option<Vec<f32>> {
        with_cache(&self.embeddings, |cache| cache.get(key)).flatten()
    }

    #[inline]
    pub fn put_embedding(&self, key: CacheKey, vector: Vec<f32>) {
        with_cache(&self.embeddings, |cache| cache.insert(key, vector));
    }

    #[inline]
    pub fn get_search(&self, key: &CacheKey) -> Option<Vec<SearchResult>> {
        with_cache(&self.search, |cache| cache.get(key)).flatten()
    }

    #[inline]
    pub fn put_search(&self, key: CacheKey, results: Vec<SearchResult>) {
        with_cache(&self.search, |cache| cache.insert(key, results));
    }

    /// Drop every cached search result, after the store was mutated
    #[inline]
    pub fn invalidate_search(&self) {
        with_cache(&self.search, BoundedCache::clear);
    }

    #[inline]
    pub fn get_response(&self, key: &CacheKey) -> Option<ResponseCacheEntry> {
        with_cache(&self.responses, |cache| cache.get(key)).flatten()
    }

    #[inline]
    pub fn put_response(&self, key: CacheKey, entry: ResponseCacheEntry) {
        with_cache(&self.responses, |cache| cache.insert(key, entry));
    }

    #[inline]
    pub fn clear_all(&self) {
        with_cache(&self.embeddings, BoundedCache::clear);
        with_cache(&self.search, BoundedCache::clear);
        with_cache(&self.responses, BoundedCache::clear);
    }

    /// Remove expired entries from all three caches
    #[inline]
    pub fn sweep_expired(&self) -> usize {
        with_cache(&self.embeddings, BoundedCache::purge_expired).unwrap_or(0)
            + with_cache(&self.search, BoundedCache::purge_expired).unwrap_or(0)
            + with_cache(&self.responses, BoundedCache::purge_expired).unwrap_or(0)
    }

    #[inline]
    pub fn stats(&self) -> CacheLayerStats {
        CacheLayerStats {
            embeddings: with_cache(&self.embeddings, |cache| cache.stats())
                .unwrap_or_else(|| unavailable_stats("embedding")),
            search: with_cache(&self.search, |cache| cache.stats())
                .unwrap_or_else(|| unavailable_stats("search")),
            responses: with_cache(&self.responses, |cache| cache.stats())
                .unwrap_or_else(|| unavailable_stats("response")),
        }
    }

    /// Start the periodic expiry sweep. The task stops when the returned
    /// handle is dropped or when the layer itself is dropped.
    #[inline]
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> CacheSweeper {
        let layer = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(layer) = layer.upgrade() else {
                    debug!("Cache layer dropped, stopping sweeper");
                    break;
                };
                let removed = layer.sweep_expired();
                if removed > 0 {
                    debug!("Cache sweep removed {} expired entries", removed);
                }
            }
        });

        CacheSweeper { handle }
    }
}

/// Handle to the background sweep task; aborts it on drop
pub struct CacheSweeper {
    handle: JoinHandle<()>,
}

impl CacheSweeper {
    #[inline]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    #[inline]
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn with_cache<V, R>(
    cache: &Mutex<BoundedCache<V>>,
    op: impl FnOnce(&mut BoundedCache<V>) -> R,
) -> Option<R> {
    let Ok(mut guard) = cache.lock() else {
        let err = RagError::Cache("cache lock poisoned by a panicked writer".to_string());
        warn!(error = %err, "Cache unavailable, treating as miss");
        return None;
    };
    Some(op(&mut guard))
}

fn unavailable_stats(name: &'static str) -> CacheStats {
    CacheStats {
        name,
        size: 0,
        capacity: 0,
        hits: 0,
        misses: 0,
        evictions: 0,
        expirations: 0,
    }
}
