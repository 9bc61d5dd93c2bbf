//! Lock-guarded hash map.
//!
//! Reads take the shared side of an `RwLock`, writes take the exclusive side.
//! Compound operations ([`ConcurrentMap::mutate`], [`ConcurrentMap::get_or_insert_with`])
//! run their callback while the write lock is held, so callbacks must be
//! short and must never touch the same map.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Thread-safe map shared by reference (wrap it in an `Arc` to share ownership).
pub struct ConcurrentMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Eq + Hash,
{
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Create an empty map with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    // A panic inside a callback must not take every other reader down with it.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone the value stored for `key`.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.read().get(key).cloned()
    }

    /// Store `value` for `key`, returning the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.write().insert(key, value)
    }

    /// Remove and return the value stored for `key`.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.write().remove(key)
    }

    /// Check whether `key` has a value.
    pub fn contains_key(&self, key: &K) -> bool {
        self.read().contains_key(key)
    }

    /// Replace the value for an existing `key` with `mutation(old)`.
    ///
    /// Returns `false` (and does nothing) when the key is absent.
    pub fn mutate(&self, key: &K, mutation: impl FnOnce(&mut V)) -> bool {
        match self.write().get_mut(key) {
            Some(value) => {
                mutation(value);
                true
            }
            None => false,
        }
    }

    /// Return the value for `key`, inserting `make()` first if it is missing.
    ///
    /// `make` runs under the write lock.
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V
    where
        V: Clone,
    {
        if let Some(value) = self.read().get(&key) {
            return value.clone();
        }
        self.write().entry(key).or_insert_with(make).clone()
    }

    /// Copy the whole map.
    pub fn snapshot(&self) -> HashMap<K, V>
    where
        K: Clone,
        V: Clone,
    {
        self.read().clone()
    }

    /// Copy all keys (in arbitrary order).
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.read().keys().cloned().collect()
    }

    /// Copy all values (in arbitrary order).
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.read().values().cloned().collect()
    }

    /// Visit every entry while holding the read lock.
    pub fn for_each(&self, mut visit: impl FnMut(&K, &V)) {
        for (key, value) in self.read().iter() {
            visit(key, value);
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.write().clear();
    }
}

impl<K, V> Default for ConcurrentMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for ConcurrentMap<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentMap")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_insert_get_remove() {
        let map = ConcurrentMap::new();
        assert!(map.is_empty());

        assert_eq!(map.insert("a", 1), None);
        assert_eq!(map.insert("a", 2), Some(1));
        assert_eq!(map.get(&"a"), Some(2));
        assert!(map.contains_key(&"a"));
        assert_eq!(map.len(), 1);

        assert_eq!(map.remove(&"a"), Some(2));
        assert_eq!(map.remove(&"a"), None);
        assert!(!map.contains_key(&"a"));
    }

    #[test]
    fn test_mutate_only_touches_existing_keys() {
        let map = ConcurrentMap::new();
        map.insert(1u32, 10u32);

        assert!(map.mutate(&1, |v| *v += 5));
        assert!(!map.mutate(&2, |v| *v += 5));

        assert_eq!(map.get(&1), Some(15));
        assert_eq!(map.get(&2), None);
    }

    #[test]
    fn test_get_or_insert_with_keeps_first_value() {
        let map = ConcurrentMap::new();
        assert_eq!(map.get_or_insert_with('x', || 1), 1);
        assert_eq!(map.get_or_insert_with('x', || 2), 1);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let map = ConcurrentMap::new();
        map.insert(1, "one");
        let snapshot = map.snapshot();
        map.insert(2, "two");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(map.len(), 2);

        let mut keys = map.keys();
        keys.sort();
        assert_eq!(keys, vec![1, 2]);

        let mut seen = 0;
        map.for_each(|_, _| seen += 1);
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_concurrent_mutation_is_atomic() {
        let map = Arc::new(ConcurrentMap::new());
        map.insert("count", 0u64);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let map = map.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        map.mutate(&"count", |v| *v += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.get(&"count"), Some(8000));
    }
}
