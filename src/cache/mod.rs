//! Read-through LRU cache for hot keys.
//!
//! Strictly advisory: the engine consults the memtable first (which is
//! authoritative for tombstones), so the cache only ever short-circuits
//! SSTable lookups. Deletes must invalidate their key — a stale cached
//! value would resurrect a deleted record.

use std::num::NonZeroUsize;

use lru::LruCache;

/// Fixed-capacity LRU mapping key bytes to value bytes.
pub struct ReadCache {
    inner: LruCache<Vec<u8>, Vec<u8>>,
}

impl ReadCache {
    /// Creates a cache holding up to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            inner: LruCache::new(capacity),
        }
    }

    /// Inserts or promotes `key`, evicting the least-recently-used entry
    /// when at capacity.
    pub fn touch(&mut self, key: &[u8], value: &[u8]) {
        self.inner.put(key.to_vec(), value.to_vec());
    }

    /// Returns the cached value and promotes it.
    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.get(key).cloned()
    }

    /// Drops `key` from the cache.
    pub fn invalidate(&mut self, key: &[u8]) {
        self.inner.pop(key);
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// `true` when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
