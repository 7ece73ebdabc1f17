//! Failures surfaced by the table and its shards.

use std::time::Duration;

/// Errors returned by the fallible (`try_*`) operations.
///
/// Nothing here is retried internally; an operation that fails leaves the
/// shard it targeted exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The requested capacity does not fit in the address space.
    #[error("probing table capacity overflow")]
    CapacityOverflow,
    /// The allocator refused the slot array for a rehash.
    #[error("failed to allocate {slots} slots")]
    AllocFailed { slots: usize },
    /// A non-blocking acquisition found the shard locked.
    #[error("shard {shard} is locked")]
    WouldBlock { shard: usize },
    /// A timed acquisition gave up.
    #[error("timed out after {timeout:?} waiting for shard {shard}")]
    LockTimeout { shard: usize, timeout: Duration },
    #[error("shard count must be a power of two in 1..={max}, got {count}")]
    InvalidShardCount { count: usize, max: usize },
}
