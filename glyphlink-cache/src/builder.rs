//! Single-flight memoizing cache.
//!
//! Reads go straight to the backing store. On a miss the caller takes the
//! cache's build lock, checks again, and only then runs the builder, so a key is
//! built at most once no matter how many threads race for it.
//!
//! Builders report failures as [`BuildError`]: permanent failures are cached
//! like values, transient failures are handed back without being stored so the
//! next request retries.

use std::convert::Infallible;
use std::hash::Hash;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;

use crate::map::ConcurrentMap;

/// Failure reported by a [`CacheBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError<E> {
    /// Retrying later may succeed; the failure is not cached.
    Transient(E),
    /// Retrying will fail the same way; the failure is cached for the key.
    Permanent(E),
}

impl<E> BuildError<E> {
    /// Unwrap the underlying error.
    pub fn into_inner(self) -> E {
        match self {
            BuildError::Transient(e) | BuildError::Permanent(e) => e,
        }
    }
}

/// A stored cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry<V, E> {
    Ready(V),
    Failed(E),
}

impl<V, E> Entry<V, E> {
    pub fn into_result(self) -> Result<V, E> {
        match self {
            Entry::Ready(value) => Ok(value),
            Entry::Failed(error) => Err(error),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Entry::Ready(_))
    }
}

/// Computes the value for a key on a cache miss.
pub trait CacheBuilder<K> {
    type Value: Clone;
    type Error: Clone;

    fn make(&self, key: &K) -> Result<Self::Value, BuildError<Self::Error>>;
}

/// Adapts a closure into a [`CacheBuilder`].
pub struct FnBuilder<K, V, E, F> {
    make: F,
    _marker: PhantomData<fn(&K) -> (V, E)>,
}

impl<K, V, E, F> FnBuilder<K, V, E, F>
where
    F: Fn(&K) -> Result<V, BuildError<E>>,
{
    pub fn new(make: F) -> Self {
        Self {
            make,
            _marker: PhantomData,
        }
    }
}

impl<K, V, E, F> CacheBuilder<K> for FnBuilder<K, V, E, F>
where
    V: Clone,
    E: Clone,
    F: Fn(&K) -> Result<V, BuildError<E>>,
{
    type Value = V;
    type Error = E;

    fn make(&self, key: &K) -> Result<V, BuildError<E>> {
        (self.make)(key)
    }
}

/// Counters for a [`KeyedBuilderCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered from a stored entry.
    pub hits: u64,
    /// Requests that found nothing stored and took the build lock.
    pub misses: u64,
    /// Builder invocations.
    pub builds: u64,
    /// Stored entries (values and cached failures).
    pub len: usize,
}

enum Storage<K, V, E> {
    Unbounded(ConcurrentMap<K, Entry<V, E>>),
    /// `LruCache::get` promotes the entry, so even reads need the lock.
    Bounded(Mutex<LruCache<K, Entry<V, E>>>),
}

/// Memoizing cache that runs its builder at most once per key.
pub struct KeyedBuilderCache<K, B>
where
    B: CacheBuilder<K>,
{
    builder: B,
    storage: Storage<K, B::Value, B::Error>,
    /// One build lock per cache: builds of different keys serialize too.
    build_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
}

impl<K, B> KeyedBuilderCache<K, B>
where
    K: Eq + Hash + Clone,
    B: CacheBuilder<K>,
{
    /// Create an unbounded cache. Entries live as long as the cache.
    pub fn new(builder: B) -> Self {
        Self::with_storage(builder, Storage::Unbounded(ConcurrentMap::new()))
    }

    /// Create a cache that keeps at most `capacity` entries, dropping the
    /// least recently used one when full.
    pub fn bounded(builder: B, capacity: NonZeroUsize) -> Self {
        Self::with_storage(builder, Storage::Bounded(Mutex::new(LruCache::new(capacity))))
    }

    /// Create a cache bounded by `capacity` when given, unbounded otherwise.
    pub fn with_capacity_limit(builder: B, capacity: Option<NonZeroUsize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(builder, capacity),
            None => Self::new(builder),
        }
    }

    fn with_storage(builder: B, storage: Storage<K, B::Value, B::Error>) -> Self {
        Self {
            builder,
            storage,
            build_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            builds: AtomicU64::new(0),
        }
    }

    /// Return the value for `key`, building it on first request.
    ///
    /// Cached failures are returned as `Err` without re-running the builder.
    pub fn get(&self, key: &K) -> Result<B::Value, B::Error> {
        if let Some(entry) = self.peek(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return entry.into_result();
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have finished the build while we waited.
        if let Some(entry) = self.peek(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return entry.into_result();
        }

        self.builds.fetch_add(1, Ordering::Relaxed);
        match self.builder.make(key) {
            Ok(value) => {
                self.store(key.clone(), Entry::Ready(value.clone()));
                Ok(value)
            }
            Err(BuildError::Permanent(error)) => {
                self.store(key.clone(), Entry::Failed(error.clone()));
                Err(error)
            }
            Err(BuildError::Transient(error)) => {
                tracing::trace!("transient build failure, entry not cached");
                Err(error)
            }
        }
    }

    /// Look up a stored entry without building.
    pub fn peek(&self, key: &K) -> Option<Entry<B::Value, B::Error>> {
        match &self.storage {
            Storage::Unbounded(map) => map.get(key),
            Storage::Bounded(lru) => self.lock_lru(lru).get(key).cloned(),
        }
    }

    /// Seed or overwrite the value for `key` without running the builder.
    pub fn insert(&self, key: K, value: B::Value) {
        self.store(key, Entry::Ready(value));
    }

    fn store(&self, key: K, entry: Entry<B::Value, B::Error>) {
        match &self.storage {
            Storage::Unbounded(map) => {
                map.insert(key, entry);
            }
            Storage::Bounded(lru) => {
                self.lock_lru(lru).put(key, entry);
            }
        }
    }

    fn lock_lru<'a>(
        &self,
        lru: &'a Mutex<LruCache<K, Entry<B::Value, B::Error>>>,
    ) -> MutexGuard<'a, LruCache<K, Entry<B::Value, B::Error>>> {
        lru.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check whether `key` has a stored entry (value or cached failure).
    pub fn contains(&self, key: &K) -> bool {
        match &self.storage {
            Storage::Unbounded(map) => map.contains_key(key),
            Storage::Bounded(lru) => self.lock_lru(lru).contains(key),
        }
    }

    /// Visit every stored entry.
    pub fn for_each(&self, mut visit: impl FnMut(&K, &Entry<B::Value, B::Error>)) {
        match &self.storage {
            Storage::Unbounded(map) => map.for_each(|k, v| visit(k, v)),
            Storage::Bounded(lru) => {
                for (k, v) in self.lock_lru(lru).iter() {
                    visit(k, v);
                }
            }
        }
    }

    /// Copy every stored value. Cached failures are skipped.
    pub fn snapshot(&self) -> Vec<(K, B::Value)> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each(|k, entry| {
            if let Entry::Ready(value) = entry {
                out.push((k.clone(), value.clone()));
            }
        });
        out
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Unbounded(map) => map.len(),
            Storage::Bounded(lru) => self.lock_lru(lru).len(),
        }
    }

    /// Check if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current hit/build counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            len: self.len(),
        }
    }

    /// The builder this cache runs on misses.
    pub fn builder(&self) -> &B {
        &self.builder
    }
}

impl<K, B> KeyedBuilderCache<K, B>
where
    K: Eq + Hash + Clone,
    B: CacheBuilder<K, Error = Infallible>,
{
    /// Return the value for `key` from a builder that cannot fail.
    pub fn value(&self, key: &K) -> B::Value {
        match self.get(key) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl<K, B> std::fmt::Debug for KeyedBuilderCache<K, B>
where
    K: Eq + Hash + Clone,
    B: CacheBuilder<K>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedBuilderCache")
            .field("stats", &self.stats())
            .field("bounded", &matches!(self.storage, Storage::Bounded(_)))
            .finish_non_exhaustive()
    }
}
