//! Integration tests for the caches under real thread contention.
//!
//! Every test hammers one cache from several OS threads and then checks the
//! counters, so a race in the double-checked build path shows up as an extra
//! builder invocation.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use glyphlink_cache::{BuildError, ConcurrentMap, FnBuilder, KeyedBuilderCache};

const THREADS: usize = 8;
const CALLS_PER_THREAD: usize = 125;

#[test]
fn test_one_build_for_one_thousand_requests() {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = builds.clone();
    let cache = Arc::new(KeyedBuilderCache::new(FnBuilder::new(move |key: &String| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<_, BuildError<Infallible>>(Arc::new(key.to_uppercase()))
    })));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = cache.clone();
            thread::spawn(move || {
                (0..CALLS_PER_THREAD)
                    .map(|_| cache.value(&"glyph".to_string()))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut values = Vec::new();
    for handle in handles {
        values.extend(handle.join().expect("worker panicked"));
    }

    assert_eq!(values.len(), THREADS * CALLS_PER_THREAD);
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    assert_eq!(cache.len(), 1);

    let stats = cache.stats();
    assert_eq!(stats.builds, 1);
    assert_eq!(stats.hits as usize, THREADS * CALLS_PER_THREAD - 1);
}

#[test]
fn test_distinct_keys_each_build_once() {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = builds.clone();
    let cache = Arc::new(KeyedBuilderCache::new(FnBuilder::new(move |key: &u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<_, BuildError<Infallible>>(key * 2)
    })));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = cache.clone();
            thread::spawn(move || {
                for key in 0..64u32 {
                    assert_eq!(cache.value(&key), key * 2);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    assert_eq!(builds.load(Ordering::SeqCst), 64);
    let mut snapshot = cache.snapshot();
    snapshot.sort();
    assert_eq!(snapshot.len(), 64);
    assert_eq!(snapshot[10], (10, 20));
}

#[test]
fn test_map_get_or_insert_with_races_to_one_value() {
    let map = Arc::new(ConcurrentMap::new());
    let inserted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let map = map.clone();
            let inserted = inserted.clone();
            thread::spawn(move || {
                map.get_or_insert_with("slot", || {
                    inserted.fetch_add(1, Ordering::SeqCst);
                    i
                })
            })
        })
        .collect();

    let seen: Vec<usize> = handles
        .into_iter()
        .map(|h| h.join().expect("worker panicked"))
        .collect();

    assert_eq!(inserted.load(Ordering::SeqCst), 1);
    assert!(seen.iter().all(|v| *v == seen[0]));
}
