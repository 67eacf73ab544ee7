//! Bounded least-recently-used index with eviction notification

use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Receives every entry that leaves an [`LruIndex`] other than by replacement
pub trait EvictionListener<K, V>: Send + Sync {
    fn on_evict(&self, key: K, value: V);
}

/// Listener that ignores evictions
pub struct NoopListener;

impl<K, V> EvictionListener<K, V> for NoopListener {
    fn on_evict(&self, _key: K, _value: V) {}
}

/// Thread-safe fixed-capacity LRU map.
///
/// Reads through [`get`](Self::get) and writes through
/// [`insert`](Self::insert) both count as use. Evictions caused by capacity
/// pressure, [`remove`](Self::remove) and [`purge`](Self::purge) are all
/// reported to the listener synchronously, with the internal lock held: no
/// caller observes an evicted key as absent until its listener has returned.
/// Listeners must not call back into the index.
pub struct LruIndex<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, V>>,
    listener: Box<dyn EvictionListener<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> LruIndex<K, V> {
    pub fn new(capacity: NonZeroUsize, listener: Box<dyn EvictionListener<K, V>>) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            listener,
        }
    }

    /// Insert or update `key`. Returns true if an older entry was evicted to
    /// make room.
    pub fn insert(&self, key: K, value: V) -> bool {
        let mut entries = self.entries.lock();
        match entries.push(key.clone(), value) {
            // Same key: the old value was replaced, not evicted
            Some((old_key, _)) if old_key == key => false,
            Some((old_key, old_value)) => {
                self.listener.on_evict(old_key, old_value);
                true
            }
            None => false,
        }
    }

    /// Look up `key` and mark it as most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    /// Look up `key` without touching its recency
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries.lock().peek(key).cloned()
    }

    /// Membership check without touching recency
    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains(key)
    }

    /// Remove `key`, notifying the listener if it was present
    pub fn remove(&self, key: &K) -> bool {
        let mut entries = self.entries.lock();
        match entries.pop_entry(key) {
            Some((old_key, old_value)) => {
                self.listener.on_evict(old_key, old_value);
                true
            }
            None => false,
        }
    }

    /// Evict every entry, least recently used first. Returns how many went.
    pub fn purge(&self) -> usize {
        let mut entries = self.entries.lock();
        let mut count = 0;
        while let Some((key, value)) = entries.pop_lru() {
            self.listener.on_evict(key, value);
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}
