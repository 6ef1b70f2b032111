//! Fixed-capacity LRU cache of shared values keyed by asset hash.

use std::num::NonZeroUsize;
use std::sync::Arc;

use kiln_common::AssetHash;

/// What an insertion did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertType {
    /// The key was new and nothing was displaced.
    Add,
    /// The key was already present and its value was replaced.
    Update,
    /// The key was new and the least recently used entry was evicted to
    /// make room.
    EvictAndReplace,
}

/// LRU cache handing out shared values.
///
/// Evicting an entry only drops the cache's reference; callers that still
/// hold the value keep it alive.
pub struct LruCache<V> {
    inner: lru::LruCache<AssetHash, Arc<V>>,
}

impl<V> LruCache<V> {
    /// Creates a cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: lru::LruCache::new(capacity),
        }
    }

    /// Returns the value for `hash` and marks it most recently used.
    pub fn get(&mut self, hash: AssetHash) -> Option<Arc<V>> {
        self.inner.get(&hash).cloned()
    }

    /// Returns the value for `hash` without touching recency.
    pub fn peek(&self, hash: AssetHash) -> Option<Arc<V>> {
        self.inner.peek(&hash).cloned()
    }

    /// Inserts `value` as the most recently used entry.
    pub fn insert(&mut self, hash: AssetHash, value: Arc<V>) -> InsertType {
        if self.inner.contains(&hash) {
            self.inner.put(hash, value);
            return InsertType::Update;
        }
        match self.inner.push(hash, value) {
            Some((evicted, _)) => {
                log::debug!("lru evicted {evicted} for {hash}");
                InsertType::EvictAndReplace
            }
            None => InsertType::Add,
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(raw: u64) -> AssetHash {
        AssetHash::from_raw(raw)
    }

    #[test]
    fn add_then_update() {
        let mut cache = LruCache::new(2);
        assert_eq!(cache.insert(h(1), Arc::new("a")), InsertType::Add);
        assert_eq!(cache.insert(h(1), Arc::new("b")), InsertType::Update);
        assert_eq!(*cache.get(h(1)).unwrap(), "b");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn full_cache_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert(h(1), Arc::new(1));
        cache.insert(h(2), Arc::new(2));
        cache.get(h(1));

        assert_eq!(cache.insert(h(3), Arc::new(3)), InsertType::EvictAndReplace);
        assert!(cache.peek(h(1)).is_some());
        assert!(!cache.peek(h(2)).is_some());
        assert!(cache.peek(h(3)).is_some());
    }

    #[test]
    fn peek_does_not_touch_recency() {
        let mut cache = LruCache::new(2);
        cache.insert(h(1), Arc::new(1));
        cache.insert(h(2), Arc::new(2));
        assert_eq!(cache.peek(h(1)).map(|v| *v), Some(1));

        cache.insert(h(3), Arc::new(3));
        assert!(!cache.peek(h(1)).is_some());
    }

    #[test]
    fn evicted_value_outlives_cache_entry() {
        let mut cache = LruCache::new(1);
        cache.insert(h(1), Arc::new(String::from("held")));
        let held = cache.get(h(1)).unwrap();
        cache.insert(h(2), Arc::new(String::from("other")));
        assert!(!cache.peek(h(1)).is_some());
        assert_eq!(*held, "held");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut cache = LruCache::new(0);
        assert_eq!(cache.insert(h(1), Arc::new(1)), InsertType::Add);
        assert_eq!(cache.insert(h(2), Arc::new(2)), InsertType::EvictAndReplace);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
