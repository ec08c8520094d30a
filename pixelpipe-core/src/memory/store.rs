//! Size-bounded LRU cache of decoded images

use crate::bitmap::Bitmap;
use crate::key::CacheKey;
use crate::pool::BitmapPool;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use lru::LruCache;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Extra under which the engine records the disk cache key of an image
pub const EXTRA_DISK_CACHE_KEY: &str = "pixelpipe#disk_cache_key";

/// A cached decoded image
#[derive(Debug, Clone)]
pub struct MemoryCacheEntry {
    pub key: CacheKey,
    pub image: Arc<Bitmap>,
    /// Decoded below the source's full resolution
    pub is_sampled: bool,
    pub size_bytes: usize,
    pub extras: HashMap<String, serde_json::Value>,
}

impl MemoryCacheEntry {
    pub fn disk_cache_key(&self) -> Option<&str> {
        self.extras.get(EXTRA_DISK_CACHE_KEY)?.as_str()
    }
}

/// Memory cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    /// Inserts refused for exceeding the whole budget
    pub rejected: u64,
    pub evictions: u64,
}

impl MemoryCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct MemoryState {
    /// Unbounded by count; `size` is what gets trimmed
    entries: LruCache<CacheKey, MemoryCacheEntry>,
    size: usize,
    stats: MemoryCacheStats,
}

impl MemoryState {
    fn take(&mut self, key: &CacheKey) -> Option<MemoryCacheEntry> {
        let entry = self.entries.pop(key)?;
        self.size -= entry.size_bytes;
        Some(entry)
    }

    /// Evict until `size <= max_bytes`, returning what was evicted
    fn evict_to(&mut self, max_bytes: usize) -> Vec<MemoryCacheEntry> {
        let mut evicted = Vec::new();
        while self.size > max_bytes {
            let Some((oldest, entry)) = self.entries.pop_lru() else {
                break;
            };
            debug!("Evicting memory cache entry: {}", oldest);
            self.size -= entry.size_bytes;
            self.stats.evictions += 1;
            evicted.push(entry);
        }
        evicted
    }
}

/// Strict-LRU cache from [`CacheKey`] to decoded image, bounded in bytes
///
/// `get` and `set` both promote. When a pool is attached, evicted images
/// that nothing else references go back to it.
pub struct MemoryCache {
    max_size: usize,
    pool: Option<Arc<BitmapPool>>,
    state: Mutex<MemoryState>,
}

impl MemoryCache {
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            max_size: max_size_bytes,
            pool: None,
            state: Mutex::new(MemoryState {
                entries: LruCache::unbounded(),
                size: 0,
                stats: MemoryCacheStats::default(),
            }),
        }
    }

    pub fn with_pool(max_size_bytes: usize, pool: Arc<BitmapPool>) -> Self {
        let mut cache = Self::new(max_size_bytes);
        cache.pool = Some(pool);
        cache
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Bytes currently held
    pub fn size(&self) -> usize {
        self.state.lock().size
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys, least recently used first
    pub fn keys(&self) -> Vec<CacheKey> {
        self.state
            .lock()
            .entries
            .iter()
            .rev()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn stats(&self) -> MemoryCacheStats {
        self.state.lock().stats.clone()
    }

    pub fn get(&self, key: &CacheKey) -> Option<MemoryCacheEntry> {
        let mut state = self.state.lock();
        match state.entries.get(key).cloned() {
            Some(entry) => {
                state.stats.hits += 1;
                Some(entry)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Insert or replace an entry
    ///
    /// Returns `false` if the image alone exceeds the budget; any previous
    /// entry for the key is dropped in that case.
    pub fn set(
        &self,
        key: CacheKey,
        image: Arc<Bitmap>,
        is_sampled: bool,
        extras: HashMap<String, serde_json::Value>,
    ) -> bool {
        let size_bytes = image.allocation_byte_count();
        let mut state = self.state.lock();
        let mut released = Vec::new();

        if let Some(previous) = state.take(&key) {
            released.push(previous);
        }

        let accepted = size_bytes <= self.max_size;
        if accepted {
            debug!("Caching {} ({} bytes) in memory", key, size_bytes);
            state.entries.put(
                key.clone(),
                MemoryCacheEntry {
                    key,
                    image,
                    is_sampled,
                    size_bytes,
                    extras,
                },
            );
            state.size += size_bytes;
            state.stats.puts += 1;
            released.extend(state.evict_to(self.max_size));
        } else {
            debug!(
                "Not caching {}: {} bytes exceeds the {} byte budget",
                key, size_bytes, self.max_size
            );
            state.stats.rejected += 1;
        }

        drop(state);
        self.recycle(released);
        accepted
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        let removed = self.state.lock().take(key);
        let found = removed.is_some();
        self.recycle(removed);
        found
    }

    /// Remove every entry whose base key starts with `prefix`
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(k, _)| k.base.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        let removed: Vec<MemoryCacheEntry> = keys.iter().filter_map(|k| state.take(k)).collect();
        drop(state);

        let count = removed.len();
        if count > 0 {
            debug!("Removed {} memory cache entries with prefix {}", count, prefix);
        }
        self.recycle(removed);
        count
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.size = 0;
        let removed: Vec<MemoryCacheEntry> =
            std::iter::from_fn(|| state.entries.pop_lru().map(|(_, e)| e)).collect();
        drop(state);
        self.recycle(removed);
    }

    /// Evict least recently used entries until at most `max_bytes` remain
    pub fn trim_to_size(&self, max_bytes: usize) {
        let evicted = self.state.lock().evict_to(max_bytes);
        self.recycle(evicted);
    }

    fn recycle(&self, entries: impl IntoIterator<Item = MemoryCacheEntry>) {
        let Some(pool) = &self.pool else {
            return;
        };
        for entry in entries {
            if let Ok(bitmap) = Arc::try_unwrap(entry.image) {
                pool.put(bitmap);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::PixelConfig;

    fn image(bytes: u32) -> Arc<Bitmap> {
        Arc::new(Bitmap::new(bytes, 1, PixelConfig::Alpha8))
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::new(name)
    }

    #[test]
    fn test_get_after_set() {
        let cache = MemoryCache::new(100);
        assert!(cache.set(key("a"), image(10), false, HashMap::new()));
        let entry = cache.get(&key("a")).unwrap();
        assert_eq!(entry.size_bytes, 10);
        assert!(!entry.is_sampled);
        assert_eq!(cache.size(), 10);
        assert!(cache.get(&key("b")).is_none());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.puts), (1, 1, 1));
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = MemoryCache::new(30);
        cache.set(key("a"), image(10), false, HashMap::new());
        cache.set(key("b"), image(10), false, HashMap::new());
        cache.set(key("c"), image(10), false, HashMap::new());
        // Promote a, making b the oldest
        cache.get(&key("a"));
        cache.set(key("d"), image(10), false, HashMap::new());

        assert!(cache.size() <= cache.max_size());
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("c")).is_some());
        assert!(cache.get(&key("d")).is_some());
    }

    #[test]
    fn test_keys_follow_access_order() {
        let cache = MemoryCache::new(1 << 20);
        for i in 0..2000 {
            cache.set(key(&format!("k{i}")), image(1), false, HashMap::new());
        }
        // Touch every even key, oldest first
        for i in (0..2000).step_by(2) {
            cache.get(&key(&format!("k{i}")));
        }

        let keys = cache.keys();
        assert_eq!(keys.len(), 2000);
        assert_eq!(keys[0], key("k1"));
        assert_eq!(keys[999], key("k1999"));
        assert_eq!(keys[1000], key("k0"));
        assert_eq!(keys[1999], key("k1998"));

        cache.trim_to_size(1000);
        assert_eq!(cache.len(), 1000);
        assert!(cache.get(&key("k1999")).is_none());
        assert!(cache.get(&key("k0")).is_some());
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let cache = MemoryCache::new(50);
        cache.set(key("a"), image(10), false, HashMap::new());
        assert!(!cache.set(key("a"), image(51), false, HashMap::new()));
        assert!(cache.get(&key("a")).is_none());
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.stats().rejected, 1);
    }

    #[test]
    fn test_replace_updates_size() {
        let cache = MemoryCache::new(100);
        cache.set(key("a"), image(10), false, HashMap::new());
        cache.set(key("a"), image(25), true, HashMap::new());
        assert_eq!(cache.size(), 25);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key("a")).unwrap().is_sampled);
    }

    #[test]
    fn test_remove_prefix_and_clear() {
        let cache = MemoryCache::new(100);
        cache.set(key("https://a/1"), image(5), false, HashMap::new());
        cache.set(key("https://a/2"), image(5), false, HashMap::new());
        cache.set(key("https://b/1"), image(5), false, HashMap::new());

        assert_eq!(cache.remove_prefix("https://a/"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.remove(&key("https://b/1")));
        assert!(!cache.remove(&key("https://b/1")));

        cache.set(key("x"), image(5), false, HashMap::new());
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_trim_to_size() {
        let cache = MemoryCache::new(100);
        for name in ["a", "b", "c", "d"] {
            cache.set(key(name), image(20), false, HashMap::new());
        }
        cache.trim_to_size(40);
        assert_eq!(cache.size(), 40);
        assert_eq!(cache.keys(), vec![key("c"), key("d")]);
    }

    #[test]
    fn test_evicted_unique_images_return_to_pool() {
        let pool = Arc::new(BitmapPool::new(1024));
        let cache = MemoryCache::with_pool(20, Arc::clone(&pool));

        cache.set(key("a"), image(10), false, HashMap::new());
        let held = image(10);
        cache.set(key("b"), Arc::clone(&held), false, HashMap::new());
        cache.clear();

        // a was only referenced by the cache; b is still held here
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_disk_cache_key_extra() {
        let cache = MemoryCache::new(100);
        let mut extras = HashMap::new();
        extras.insert(
            EXTRA_DISK_CACHE_KEY.to_string(),
            serde_json::Value::String("https://a/1".into()),
        );
        cache.set(key("a"), image(1), false, extras);
        assert_eq!(cache.get(&key("a")).unwrap().disk_cache_key(), Some("https://a/1"));
    }
}
