//! Construction parameters for `ParallelHashSet`.

use crate::error::Error;
use crate::router::ShardRouter;

/// Default number of shards (`2^4`).
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Largest accepted shard count. Routing reads `log2(shard_count)` bits
/// starting at bit 32 of the hash; 16 bits keeps them clear of the 7-bit
/// control fragment at the top.
pub const MAX_SHARD_COUNT: usize = 1 << 16;

/// Shard count and initial capacity for a set.
///
/// The shard count is fixed for the lifetime of the set: changing it would
/// move keys between shards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Number of shards; a power of two in `1..=MAX_SHARD_COUNT`.
    pub shard_count: usize,
    /// Total number of elements to allocate room for up front, split
    /// evenly across shards.
    pub capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            capacity: 0,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        ShardRouter::new(self.shard_count).map(|_| ())
    }

    /// Capacity each shard starts with.
    pub fn capacity_per_shard(&self) -> usize {
        self.capacity.div_ceil(self.shard_count.max(1))
    }
}
