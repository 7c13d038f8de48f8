//! Logical shard keys
//!
//! A shard is an integer bucket used to pick one of N backend handles.
//! It has nothing to do with the physical CPU a task happens to run on.

use serde::Serialize;
use std::fmt;
use std::time::Instant;

/// Logical shard ("core") identifier
///
/// Any value is accepted as a shard key; pools reduce it modulo their
/// size, so keys outside `[0, N)` still land on a valid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ShardIndex(pub usize);

impl ShardIndex {
    #[inline(always)]
    pub fn as_usize(self) -> usize {
        self.0
    }

    /// Reduce into `[0, shards)`. `shards` must be non-zero.
    #[inline(always)]
    pub fn reduce(self, shards: usize) -> ShardIndex {
        ShardIndex(self.0 % shards)
    }
}

impl From<usize> for ShardIndex {
    fn from(value: usize) -> Self {
        ShardIndex(value)
    }
}

impl fmt::Display for ShardIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of shards to run with when none is configured
///
/// Falls back to 1 if the available parallelism cannot be queried.
pub fn default_shard_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Picks a shard for the current unit of work
///
/// Selection is time-derived: nanoseconds elapsed on a monotonic clock,
/// reduced modulo the shard count. There is no affinity between calls for
/// the same logical entity and the spread is only statistically even.
#[derive(Debug, Clone)]
pub struct ShardResolver {
    shards: usize,
    origin: Instant,
}

impl ShardResolver {
    /// Create a resolver over `shards` buckets (0 is treated as 1)
    pub fn new(shards: usize) -> Self {
        Self {
            shards: shards.max(1),
            origin: Instant::now(),
        }
    }

    /// Number of shards this resolver maps into
    #[inline]
    pub fn shards(&self) -> usize {
        self.shards
    }

    /// Shard for the current unit of work. Always in `[0, shards)`.
    #[inline]
    pub fn resolve(&self) -> ShardIndex {
        self.resolve_raw(self.origin.elapsed().as_nanos())
    }

    /// Reduce an arbitrary raw clock reading into range
    #[inline(always)]
    pub fn resolve_raw(&self, raw: u128) -> ShardIndex {
        ShardIndex((raw % self.shards as u128) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_resolve_in_range() {
        let resolver = ShardResolver::new(4);
        for _ in 0..1_000 {
            assert!(resolver.resolve().as_usize() < 4);
        }
    }

    #[test]
    fn test_zero_shards_treated_as_one() {
        let resolver = ShardResolver::new(0);
        assert_eq!(resolver.shards(), 1);
        assert_eq!(resolver.resolve(), ShardIndex(0));
    }

    #[test]
    fn test_resolve_raw_wraps() {
        let resolver = ShardResolver::new(3);
        assert_eq!(resolver.resolve_raw(0), ShardIndex(0));
        assert_eq!(resolver.resolve_raw(4), ShardIndex(1));
        assert_eq!(resolver.resolve_raw(u128::MAX), ShardIndex((u128::MAX % 3) as usize));
    }

    #[test]
    fn test_default_shard_count_positive() {
        assert!(default_shard_count() >= 1);
    }

    #[test]
    fn test_shard_index_serializes_as_number() {
        let json = serde_json::to_string(&ShardIndex(7)).unwrap();
        assert_eq!(json, "7");
    }

    proptest! {
        #[test]
        fn prop_resolve_raw_in_range(raw in any::<u128>(), shards in 1usize..64) {
            let resolver = ShardResolver::new(shards);
            prop_assert!(resolver.resolve_raw(raw).as_usize() < shards);
        }

        #[test]
        fn prop_reduce_is_idempotent(key in any::<usize>(), shards in 1usize..64) {
            let once = ShardIndex(key).reduce(shards);
            prop_assert_eq!(once.reduce(shards), once);
        }
    }
}
