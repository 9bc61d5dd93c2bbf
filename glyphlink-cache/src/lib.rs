//! Glyphlink Cache - thread-safe maps and single-flight memoization.
//!
//! This crate is the substrate for every cache in glyphlink:
//! - [`ConcurrentMap`]: a lock-guarded `HashMap` with compound mutation helpers
//! - [`KeyedBuilderCache`]: computes a value for a key exactly once, even when
//!   many threads ask for the same key at the same time

mod builder;
mod map;

pub use builder::{BuildError, CacheBuilder, CacheStats, Entry, FnBuilder, KeyedBuilderCache};
pub use map::ConcurrentMap;
