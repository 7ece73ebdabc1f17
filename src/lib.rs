//! parallel-hashset: a hash set split into a fixed number of shards, each
//! an open-addressing table with group-at-a-time probing behind its own
//! lock.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: spread a hash set over independently locked shards so that
//!   operations on different shards never wait for each other, while each
//!   shard stays a plain single-threaded flat table.
//! - Layers:
//!   - `group`: control bytes (`EMPTY`, `DELETED`, or the 7-bit `h2`
//!     fragment) and matching a whole group of them at once, through SSE2
//!     when available and 64-bit word arithmetic otherwise.
//!   - `ProbingTable<T>`: one shard's table. Takes precomputed hashes and
//!     equality closures; never hashes on its own.
//!   - `Shard<T, R>`: a `ProbingTable` behind a `lock_api::Mutex<R, _>`,
//!     reachable only through scoped `with_lock*` accessors.
//!   - `ShardRouter`: hash to shard index.
//!   - `ParallelHashSet<T, S, R>`: owns the hasher, the router and the
//!     shards; hashes once, routes, and locks exactly one shard per
//!     element operation.
//!
//! Constraints
//! - The shard count is fixed at construction and is a power of two.
//! - Routing reads bits 32.. of the hash, probing starts from the low bits
//!   and `h2` is the top 7 bits, so the three do not overlap.
//! - Each slot keeps its full hash: rehashing never calls `T: Hash`.
//! - A table holds at most 7/8 of its buckets in live elements plus
//!   tombstones. Tombstones are only reclaimed by that shard's own rehash.
//! - Growth is all-or-nothing: the new arrays are allocated before the
//!   old ones are touched.
//!
//! Locking
//! - `R` is any `lock_api::RawMutex`. The default `NullMutex` never blocks;
//!   it is `!Sync`, so such a set cannot be shared across threads, and it
//!   panics on re-entrant acquisition. `SyncParallelHashSet` uses
//!   `parking_lot::RawMutex`.
//! - No operation holds two shard locks at once. `len`, `iter`, `rehash`,
//!   `merge` and friends walk the shards one after another and are
//!   best-effort under concurrent mutation.
//! - `try_*` operations never block; `try_insert_for` waits up to a
//!   timeout when the lock supports it. Failures come back as `Error` and
//!   leave the shard unchanged; nothing is retried.
//!
//! Notes and non-goals
//! - Not lock-free, and no snapshot consistency across shards.
//! - No element ordering beyond "shard 0 first" during iteration.
//! - `set_max_load_factor` is accepted and ignored.

pub mod config;
pub mod error;
mod group;
pub mod null_mutex;
mod parallel_hash_set;
mod parallel_hash_set_proptest;
pub mod probing_table;
pub mod router;
pub mod shard;

// Public surface
pub use config::{Config, DEFAULT_SHARD_COUNT, MAX_SHARD_COUNT};
pub use error::Error;
pub use hashbrown::hash_map::DefaultHashBuilder;
pub use null_mutex::NullMutex;
pub use parallel_hash_set::{
    InsertReturn, IntoIter, Iter, ParallelHashSet, Position, SyncParallelHashSet,
};
pub use probing_table::{InsertResult, ProbingTable, Slot};
pub use router::ShardRouter;
pub use shard::Shard;
