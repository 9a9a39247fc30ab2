//! Sharded Map Implementation
//!
//! Concurrent hashmap backing the embedded tier.
//!
//! # Design
//!
//! - Each shard has its own RwLock, minimizing contention
//! - Power-of-2 shard count enables fast modulo via bitwise AND

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Single shard containing a hashmap and statistics
pub struct Shard<K, V> {
    /// The hashmap for this shard
    map: RwLock<HashMap<K, V>>,
    /// Number of entries
    count: AtomicU64,
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Shard<K, V> {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicU64::new(0),
        }
    }

    /// Get the number of entries in this shard
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    /// Check if the shard is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V> Shard<K, V> {
    /// Get a value from the shard
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.map.read().get(key).cloned()
    }

    /// Insert a value, returning the old value if present
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut guard = self.map.write();
        let old = guard.insert(key, value);
        if old.is_none() {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        old
    }

    /// Remove a value, returning it if present
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.map.write();
        let removed = guard.remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove a value only if `predicate` holds for the current one
    pub fn remove_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut guard = self.map.write();
        if !guard.get(key).is_some_and(predicate) {
            return None;
        }
        let removed = guard.remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Clear all entries
    pub fn clear(&self) {
        let mut guard = self.map.write();
        guard.clear();
        self.count.store(0, Ordering::Relaxed);
    }

    /// Get all entries (for iteration)
    pub fn entries(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let guard = self.map.read();
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Sharded map with configurable shard count
pub struct ShardedMap<K, V, const N: usize = 16> {
    shards: Box<[Shard<K, V>]>,
}

impl<K, V, const N: usize> Default for ShardedMap<K, V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, const N: usize> ShardedMap<K, V, N> {
    /// Create a new sharded map
    pub fn new() -> Self {
        debug_assert!(N.is_power_of_two());
        let shards: Vec<Shard<K, V>> = (0..N).map(|_| Shard::new()).collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    /// Get the shard count
    #[inline]
    pub const fn shard_count(&self) -> usize {
        N
    }

    /// Get total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Iterate over shards
    pub fn shards(&self) -> impl Iterator<Item = &Shard<K, V>> {
        self.shards.iter()
    }
}

impl<K: Eq + Hash, V, const N: usize> ShardedMap<K, V, N> {
    /// Compute shard index from hash
    #[inline]
    fn shard_for(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & (N - 1)]
    }

    /// Get a value
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard_for(key).get(key)
    }

    /// Check if a key exists
    pub fn contains_key(&self, key: &K) -> bool {
        self.shard_for(key).map.read().contains_key(key)
    }

    /// Insert a value
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.shard_for(&key).insert(key, value)
    }

    /// Remove a value
    pub fn remove(&self, key: &K) -> Option<V> {
        self.shard_for(key).remove(key)
    }

    /// Remove a value if `predicate` holds for it
    pub fn remove_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> Option<V> {
        self.shard_for(key).remove_if(key, predicate)
    }

    /// Clear all shards
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.clear();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
