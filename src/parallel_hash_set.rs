//! ParallelHashSet: a hash set split into independently locked shards.
//!
//! Every operation hashes its argument once, outside any lock, routes the
//! hash to one shard, and runs under that shard's lock only. Set-wide
//! operations (`len`, `iter`, `rehash`, `clear`, ...) visit the shards one
//! at a time in index order and never hold two shard locks together, so
//! their results are best-effort under concurrent mutation.

use crate::config::Config;
use crate::error::Error;
use crate::null_mutex::NullMutex;
use crate::probing_table::{self, InsertResult, ProbingTable};
use crate::router::ShardRouter;
use crate::shard::Shard;
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::mem;
use hashbrown::hash_map::DefaultHashBuilder;
use parking_lot::lock_api::{RawMutex, RawMutexTimed};
use std::time::Duration;
use tracing::debug;

/// A `ParallelHashSet` that can be shared between threads.
pub type SyncParallelHashSet<T, S = DefaultHashBuilder> = ParallelHashSet<T, S, parking_lot::RawMutex>;

/// Where an element sits: its shard and its slot in that shard's table.
///
/// Valid until the shard next rehashes. Read it back with
/// `set.shard(pos.shard).with_lock(|table| table.get(pos.index).cloned())`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub shard: usize,
    pub index: usize,
}

/// Outcome of `ParallelHashSet::insert_node`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertReturn<T> {
    /// Slot of the inserted element, or of the equal element that was
    /// already present.
    pub position: Position,
    /// Whether the value was added.
    pub inserted: bool,
    /// The value handed back when an equal element was already present.
    pub node: Option<T>,
}

impl<T> InsertReturn<T> {
    fn new(shard: usize, result: InsertResult<T>) -> Self {
        let position = Position {
            shard,
            index: result.index(),
        };
        match result {
            InsertResult::Inserted(_) => InsertReturn {
                position,
                inserted: true,
                node: None,
            },
            InsertResult::Occupied { rejected, .. } => InsertReturn {
                position,
                inserted: false,
                node: Some(rejected),
            },
        }
    }
}

/// Equality against a borrowed form of the element.
fn equivalent<Q, T>(value: &Q) -> impl Fn(&T) -> bool + '_
where
    Q: ?Sized + Eq,
    T: Borrow<Q>,
{
    move |element| value.eq(element.borrow())
}

fn elements_eq<T: Eq>(existing: &T, candidate: &T) -> bool {
    existing == candidate
}

#[track_caller]
fn infallible<U>(res: Result<U, Error>) -> U {
    match res {
        Ok(u) => u,
        Err(err) => panic!("{err}"),
    }
}

/// Hash set whose key space is partitioned over a fixed number of shards.
///
/// `S` hashes the elements and `R` is the lock each shard owns. With the
/// default `NullMutex` the set can move between threads but not be shared;
/// use `SyncParallelHashSet` (or any other `lock_api::RawMutex`) for
/// concurrent access through `&self`.
///
/// Closures passed to `find_with`, `for_each` and `retain` run under a shard
/// lock and must not call back into the same set.
pub struct ParallelHashSet<T, S = DefaultHashBuilder, R = NullMutex> {
    hasher: S,
    router: ShardRouter,
    shards: Vec<Shard<T, R>>,
}

impl<T, R: RawMutex> ParallelHashSet<T, DefaultHashBuilder, R> {
    /// Empty set with `DEFAULT_SHARD_COUNT` shards.
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// Empty set with `shard_count` shards.
    ///
    /// Panics unless `shard_count` is a power of two no larger than
    /// `MAX_SHARD_COUNT`; see `with_config` for the fallible form.
    pub fn with_shards(shard_count: usize) -> Self {
        infallible(Self::with_config(
            Config::new().with_shard_count(shard_count),
            DefaultHashBuilder::default(),
        ))
    }

    /// Set with room for `capacity` elements, spread evenly over the
    /// default number of shards. Panics if the allocation fails.
    pub fn with_capacity(capacity: usize) -> Self {
        infallible(Self::with_config(
            Config::new().with_capacity(capacity),
            DefaultHashBuilder::default(),
        ))
    }
}

impl<T, S, R: RawMutex> ParallelHashSet<T, S, R> {
    /// Empty set with the default shard count and the given hasher.
    pub fn with_hasher(hasher: S) -> Self {
        let router = ShardRouter::default();
        Self {
            hasher,
            router,
            shards: (0..router.shard_count()).map(Shard::new).collect(),
        }
    }

    /// Set shaped by `config`. Fails if the shard count is invalid or the
    /// initial capacity cannot be allocated.
    pub fn with_config(config: Config, hasher: S) -> Result<Self, Error> {
        let router = ShardRouter::new(config.shard_count)?;
        let per_shard = config.capacity_per_shard();
        let shards = (0..router.shard_count())
            .map(|index| {
                let table = ProbingTable::try_with_capacity(per_shard)?;
                Ok(Shard::with_table(index, table))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Self {
            hasher,
            router,
            shards,
        })
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard that owns elements with this hash.
    #[inline]
    pub fn shard_index_of(&self, hash: u64) -> usize {
        self.router.route(hash)
    }

    /// Shard at `index`. Panics if `index >= shard_count()`.
    pub fn shard(&self, index: usize) -> &Shard<T, R> {
        &self.shards[index]
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    #[inline]
    fn shard_for(&self, hash: u64) -> &Shard<T, R> {
        &self.shards[self.router.route(hash)]
    }

    /// Number of elements, summed shard by shard.
    pub fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(Shard::is_empty)
    }

    /// Elements in shard `index`. Panics if `index >= shard_count()`.
    pub fn shard_len(&self, index: usize) -> usize {
        self.shards[index].len()
    }

    /// Total slots over all shards: full, deleted and empty.
    pub fn capacity(&self) -> usize {
        self.shards.iter().map(Shard::capacity).sum()
    }

    pub fn load_factor(&self) -> f32 {
        let capacity = self.capacity();
        if capacity == 0 {
            0.0
        } else {
            self.len() as f32 / capacity as f32
        }
    }

    pub fn max_load_factor(&self) -> f32 {
        probing_table::MAX_LOAD_FACTOR
    }

    /// Accepted for compatibility; the maximum load is fixed.
    pub fn set_max_load_factor(&self, _max_load_factor: f32) {}

    /// Calls `f` on every element, holding one shard lock at a time.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        for shard in &self.shards {
            shard.with_lock(|table| table.iter().for_each(&mut f));
        }
    }

    /// Keeps only the elements for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) {
        for shard in &self.shards {
            shard.with_lock(|table| table.retain(&mut keep));
        }
    }

    /// Drops every element. Each shard keeps its allocation.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.with_lock(ProbingTable::clear);
        }
    }

    /// Rebuilds every shard with at least `buckets / shard_count()` slots
    /// (rounded up), dropping tombstones. `rehash(0)` shrinks each shard to
    /// fit its elements. Shards are rebuilt one at a time.
    pub fn rehash(&self, buckets: usize) {
        let per_shard = buckets.div_ceil(self.shard_count());
        debug!(
            buckets,
            per_shard,
            shards = self.shard_count(),
            "rehashing shards"
        );
        for shard in &self.shards {
            shard.with_lock(|table| table.rehash(per_shard));
        }
    }

    /// Makes room for `capacity` elements in total. Panics if an
    /// allocation fails.
    pub fn reserve(&self, capacity: usize) {
        infallible(self.try_reserve(capacity))
    }

    /// Fallible `reserve`.
    ///
    /// A share too large to address fails with `CapacityOverflow` before
    /// any shard is touched. An `AllocFailed` stops at the first shard that
    /// cannot grow; shards already grown keep their extra capacity, and no
    /// shard's elements change either way.
    pub fn try_reserve(&self, capacity: usize) -> Result<(), Error> {
        let per_shard = capacity.div_ceil(self.shard_count());
        ProbingTable::<T>::buckets_for(per_shard)?;
        debug!(
            capacity,
            per_shard,
            shards = self.shard_count(),
            "reserving shards"
        );
        for shard in &self.shards {
            shard.with_lock(|table| table.try_reserve(per_shard.saturating_sub(table.len())))?;
        }
        Ok(())
    }

    pub fn shrink_to_fit(&self) {
        self.rehash(0)
    }

    /// Exchanges the contents of two sets, shards and hasher included.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other)
    }

    /// Lazy iterator over clones of the elements, shard 0 first.
    ///
    /// Each step locks one shard just long enough to clone the next
    /// element. Elements inserted or erased concurrently may or may not be
    /// seen, and a shard rehashed mid-iteration may yield an element twice
    /// or skip one.
    pub fn iter(&self) -> Iter<'_, T, S, R> {
        Iter {
            set: self,
            shard: 0,
            index: 0,
        }
    }
}

impl<T, S, R> ParallelHashSet<T, S, R>
where
    T: Hash + Eq,
    S: BuildHasher,
    R: RawMutex,
{
    /// Hash of `value` as used for routing and probing.
    #[inline]
    pub fn hash<Q: Hash + ?Sized>(&self, value: &Q) -> u64 {
        self.hasher.hash_one(value)
    }

    /// Adds `value` unless an equal element is present. Returns whether it
    /// was added. Only the owning shard is locked, and only it grows.
    pub fn insert(&self, value: T) -> bool {
        self.insert_node(value).inserted
    }

    /// Like `insert`, but hands `value` back when it is rejected.
    pub fn insert_node(&self, value: T) -> InsertReturn<T> {
        let hash = self.hash(&value);
        let shard = self.shard_for(hash);
        let result = shard.with_lock(|table| table.insert(hash, value, elements_eq));
        InsertReturn::new(shard.index(), result)
    }

    /// Non-blocking insert. Fails with `Error::WouldBlock` if the owning
    /// shard is locked, or with an allocation error if it cannot grow. On
    /// failure nothing changes and `value` is dropped.
    pub fn try_insert(&self, value: T) -> Result<bool, Error> {
        let hash = self.hash(&value);
        let result = self
            .shard_for(hash)
            .try_with_lock(|table| table.try_insert(hash, value, elements_eq))??;
        Ok(result.inserted())
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_with(value, |_| ()).is_some()
    }

    /// 1 if an equal element is present, else 0.
    pub fn count<Q>(&self, value: &Q) -> usize
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        usize::from(self.contains(value))
    }

    /// Clone of the stored element equal to `value`.
    pub fn get<Q>(&self, value: &Q) -> Option<T>
    where
        T: Borrow<Q> + Clone,
        Q: Hash + Eq + ?Sized,
    {
        self.find_with(value, T::clone)
    }

    /// Runs `f` on the stored element equal to `value`, under its shard
    /// lock.
    pub fn find_with<Q, F, U>(&self, value: &Q, f: F) -> Option<U>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&T) -> U,
    {
        let hash = self.hash(value);
        self.shard_for(hash).with_lock(|table| {
            let index = table.find(hash, equivalent(value))?;
            table.get(index).map(f)
        })
    }

    /// Non-blocking `contains`.
    pub fn try_contains<Q>(&self, value: &Q) -> Result<bool, Error>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash(value);
        self.shard_for(hash)
            .try_with_lock(|table| table.find(hash, equivalent(value)).is_some())
    }

    /// Removes the element equal to `value`. Returns whether one existed.
    pub fn erase<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.extract(value).is_some()
    }

    /// Removes and returns the element equal to `value`.
    pub fn extract<Q>(&self, value: &Q) -> Option<T>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash(value);
        self.shard_for(hash)
            .with_lock(|table| table.remove(hash, equivalent(value)))
    }

    /// Non-blocking `erase`.
    pub fn try_erase<Q>(&self, value: &Q) -> Result<bool, Error>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash(value);
        let removed = self
            .shard_for(hash)
            .try_with_lock(|table| table.remove(hash, equivalent(value)))?;
        Ok(removed.is_some())
    }

    /// Moves every element of `source` that is not already present into
    /// `self`. Elements equal to one in `self` stay in `source`. Each
    /// element moves on its own; there is no point at which the whole
    /// merge is visible at once. Returns the number of elements moved.
    pub fn merge<S2, R2>(&self, source: &mut ParallelHashSet<T, S2, R2>) -> usize
    where
        R2: RawMutex,
    {
        let mut moved = 0;
        for shard in &mut source.shards {
            moved += shard
                .get_mut()
                .retain_owned(|value| self.insert_node(value).node);
        }
        debug!(moved, kept = source.len(), "merged sets");
        moved
    }
}

impl<T, S, R> ParallelHashSet<T, S, R>
where
    T: Hash + Eq,
    S: BuildHasher,
    R: RawMutexTimed<Duration = Duration>,
{
    /// `insert` that waits at most `timeout` for the owning shard.
    pub fn try_insert_for(&self, value: T, timeout: Duration) -> Result<bool, Error> {
        let hash = self.hash(&value);
        let result = self
            .shard_for(hash)
            .with_lock_for(timeout, |table| table.try_insert(hash, value, elements_eq))??;
        Ok(result.inserted())
    }
}

impl<T, S: Default, R: RawMutex> Default for ParallelHashSet<T, S, R> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<T, S, R> Clone for ParallelHashSet<T, S, R>
where
    T: Clone,
    S: Clone,
    R: RawMutex,
{
    fn clone(&self) -> Self {
        let shards = self
            .shards
            .iter()
            .map(|shard| Shard::with_table(shard.index(), shard.with_lock(|t| t.clone())))
            .collect();
        Self {
            hasher: self.hasher.clone(),
            router: self.router,
            shards,
        }
    }
}

impl<T: fmt::Debug, S, R: RawMutex> fmt::Debug for ParallelHashSet<T, S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for shard in &self.shards {
            shard.with_lock(|table| {
                set.entries(table.iter());
            });
        }
        set.finish()
    }
}

/// Set equality. Compares best-effort snapshots when either set is being
/// mutated concurrently.
impl<T, S, R> PartialEq for ParallelHashSet<T, S, R>
where
    T: Hash + Eq + Clone,
    S: BuildHasher,
    R: RawMutex,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|value| other.contains(&value))
    }
}

impl<T, S, R> Eq for ParallelHashSet<T, S, R>
where
    T: Hash + Eq + Clone,
    S: BuildHasher,
    R: RawMutex,
{
}

impl<T, S, R> Extend<T> for ParallelHashSet<T, S, R>
where
    T: Hash + Eq,
    S: BuildHasher,
    R: RawMutex,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.insert(value);
        }
    }
}

impl<'a, T, S, R> Extend<&'a T> for ParallelHashSet<T, S, R>
where
    T: 'a + Hash + Eq + Copy,
    S: BuildHasher,
    R: RawMutex,
{
    fn extend<I: IntoIterator<Item = &'a T>>(&mut self, iter: I) {
        self.extend(iter.into_iter().copied());
    }
}

/// Builds a set with the default shard count; for equal elements the
/// first one wins.
impl<T, S, R> FromIterator<T> for ParallelHashSet<T, S, R>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
    R: RawMutex,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::default();
        set.extend(iter);
        set
    }
}

/// Lazy iterator returned by `ParallelHashSet::iter`.
pub struct Iter<'a, T, S, R> {
    set: &'a ParallelHashSet<T, S, R>,
    shard: usize,
    // Next slot to look at in `shard`.
    index: usize,
}

impl<T: Clone, S, R: RawMutex> Iterator for Iter<'_, T, S, R> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while let Some(shard) = self.set.shards.get(self.shard) {
            let found = shard.with_lock(|table| {
                table
                    .iter_from(self.index)
                    .map(|(index, value)| (index, value.clone()))
            });
            match found {
                Some((index, value)) => {
                    self.index = index + 1;
                    return Some(value);
                }
                None => {
                    self.shard += 1;
                    self.index = 0;
                }
            }
        }
        None
    }
}

impl<'a, T: Clone, S, R: RawMutex> IntoIterator for &'a ParallelHashSet<T, S, R> {
    type Item = T;
    type IntoIter = Iter<'a, T, S, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

type ShardIntoIter<T, R> = core::iter::FlatMap<
    std::vec::IntoIter<Shard<T, R>>,
    probing_table::IntoIter<T>,
    fn(Shard<T, R>) -> probing_table::IntoIter<T>,
>;

/// Owning iterator over the elements of a `ParallelHashSet`, shard 0 first.
pub struct IntoIter<T, R> {
    inner: ShardIntoIter<T, R>,
}

impl<T, R: RawMutex> Iterator for IntoIter<T, R> {
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<T> {
        self.inner.next()
    }
}

fn shard_into_iter<T, R: RawMutex>(shard: Shard<T, R>) -> probing_table::IntoIter<T> {
    shard.into_table().into_iter()
}

impl<T, S, R: RawMutex> IntoIterator for ParallelHashSet<T, S, R> {
    type Item = T;
    type IntoIter = IntoIter<T, R>;

    fn into_iter(self) -> Self::IntoIter {
        let f: fn(Shard<T, R>) -> probing_table::IntoIter<T> = shard_into_iter::<T, R>;
        IntoIter {
            inner: self.shards.into_iter().flat_map(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::hash::Hasher;

    #[derive(Clone, Default)]
    struct ConstBuildHasher;
    struct ConstHasher;
    impl BuildHasher for ConstBuildHasher {
        type Hasher = ConstHasher;
        fn build_hasher(&self) -> Self::Hasher {
            ConstHasher
        }
    }
    impl Hasher for ConstHasher {
        fn write(&mut self, _bytes: &[u8]) {}
        fn finish(&self) -> u64 {
            0
        }
    }

    const DEFAULT_SHARDS: usize = crate::config::DEFAULT_SHARD_COUNT;

    fn set_of<T: Hash + Eq>(n: usize, items: impl IntoIterator<Item = T>) -> ParallelHashSet<T> {
        let mut s = ParallelHashSet::with_shards(n);
        s.extend(items);
        s
    }

    fn sorted<T: Ord + Clone, S, R: RawMutex>(s: &ParallelHashSet<T, S, R>) -> Vec<T> {
        let mut v: Vec<T> = s.iter().collect();
        v.sort();
        v
    }

    /// Invariant: with 4 shards, inserting 1..=100 gives size 100 and an
    /// iteration that yields exactly those keys.
    #[test]
    fn four_shards_hold_one_to_hundred() {
        let s = set_of(4, 1..=100u64);
        assert_eq!(s.shard_count(), 4);
        assert_eq!(s.len(), 100);
        assert_eq!(sorted(&s), (1..=100u64).collect::<Vec<_>>());
        let per_shard: usize = (0..4).map(|i| s.shard_len(i)).sum();
        assert_eq!(per_shard, 100);
    }

    #[test]
    fn erase_one_of_two_strings() {
        let s: ParallelHashSet<String> = ParallelHashSet::with_shards(2);
        assert!(s.insert("a".to_string()));
        assert!(s.insert("b".to_string()));
        assert!(s.erase("a"));
        assert!(!s.contains("a"));
        assert!(s.contains("b"));
        assert_eq!(s.len(), 1);
        assert!(!s.erase("a"));
    }

    /// Invariant: merge moves only the elements missing from the target.
    #[test]
    fn merge_leaves_duplicates_in_source() {
        let set1 = set_of(DEFAULT_SHARDS, [7, 17]);
        let mut set2 = set_of(DEFAULT_SHARDS, [7, 19]);
        assert_eq!(set1.merge(&mut set2), 1);
        assert_eq!(sorted(&set1), vec![7, 17, 19]);
        assert_eq!(sorted(&set2), vec![7]);
    }

    #[test]
    fn merge_across_shard_counts_and_policies() {
        let target: SyncParallelHashSet<u32> = (0..50).collect();
        let mut source: ParallelHashSet<u32> = set_of(2, 25..100);
        assert_eq!(target.merge(&mut source), 50);
        assert_eq!(target.len(), 100);
        assert_eq!(sorted(&source), (25..50).collect::<Vec<_>>());
    }

    /// Invariant: extract then insert_node moves an element between sets,
    /// and a rejected node comes back intact.
    #[test]
    fn extract_and_insert_node_round_trip() {
        let set1 = set_of(DEFAULT_SHARDS, [7, 17]);
        let set2 = set_of(DEFAULT_SHARDS, [7, 19]);

        let node = set2.extract(&7).expect("7 is in set2");
        assert!(!set2.contains(&7));
        let at = |pos: Position| set1.shard(pos.shard).with_lock(|t| t.get(pos.index).copied());
        let ret = set1.insert_node(node);
        assert!(!ret.inserted);
        assert_eq!(ret.node, Some(7));
        assert_eq!(ret.position.shard, set1.shard_index_of(set1.hash(&7)));
        assert_eq!(at(ret.position), Some(7));

        let node = set2.extract(&19).expect("19 is in set2");
        let ret = set1.insert_node(node);
        assert!(ret.inserted);
        assert_eq!(ret.node, None);
        assert_eq!(ret.position.shard, set1.shard_index_of(set1.hash(&19)));
        assert_eq!(at(ret.position), Some(19));
        assert_eq!(sorted(&set1), vec![7, 17, 19]);
        assert!(set2.is_empty());
        assert_eq!(set2.extract(&19), None);
    }

    #[test]
    fn insert_is_idempotent() {
        let s: ParallelHashSet<u64> = ParallelHashSet::new();
        assert!(s.insert(5));
        assert!(!s.insert(5));
        assert_eq!(s.len(), 1);
        assert_eq!(s.count(&5), 1);
        assert_eq!(s.count(&6), 0);
    }

    #[test]
    fn routing_is_stable_and_matches_storage() {
        let s = set_of(8, 0..500u64);
        for k in 0..500u64 {
            let h = s.hash(&k);
            assert_eq!(h, s.hash(&k));
            let shard = s.shard_index_of(h);
            let stored = s.shard(shard).with_lock(|t| t.find(h, |v| *v == k).is_some());
            assert!(stored, "{k} not in shard {shard}");
        }
    }

    /// Invariant: a set-wide rehash keeps exactly the same members.
    #[test]
    fn rehash_preserves_membership() {
        let s = set_of(4, 0..1000u64);
        for k in (0..1000u64).step_by(3) {
            s.erase(&k);
        }
        let before = sorted(&s);
        s.rehash(0);
        assert_eq!(sorted(&s), before);
        s.rehash(1 << 14);
        assert!(s.capacity() >= 1 << 14);
        assert_eq!(sorted(&s), before);
        for i in 0..s.shard_count() {
            s.shard(i).with_lock(|t| assert_eq!(t.tombstones(), 0));
        }
    }

    #[test]
    fn reserve_splits_capacity_across_shards() {
        let s: ParallelHashSet<u64> = ParallelHashSet::with_shards(4);
        s.reserve(1000);
        for i in 0..4 {
            s.shard(i).with_lock(|t| assert!(t.growth_left() >= 250));
        }
        let cap = s.capacity();
        // Roughly 200 keys per shard against room for 448 each.
        for k in 0..800u64 {
            s.insert(k);
        }
        assert_eq!(s.capacity(), cap);
        assert_eq!(s.try_reserve(usize::MAX), Err(Error::CapacityOverflow));
    }

    #[test]
    fn oversized_reserve_leaves_every_shard_alone() {
        let s = set_of(4, 0..200u64);
        let caps: Vec<usize> = (0..4).map(|i| s.shard(i).capacity()).collect();
        // The bucket count of this share fits a usize; its slot array does not.
        for capacity in [usize::MAX, usize::MAX / 8] {
            assert_eq!(s.try_reserve(capacity), Err(Error::CapacityOverflow));
            let after: Vec<usize> = (0..4).map(|i| s.shard(i).capacity()).collect();
            assert_eq!(after, caps);
        }
        assert_eq!(s.len(), 200);
        assert_eq!(sorted(&s), (0..200u64).collect::<Vec<_>>());
    }

    #[test]
    fn with_capacity_allocates_every_shard() {
        let s: ParallelHashSet<u64> = ParallelHashSet::with_capacity(1600);
        assert_eq!(s.shard_count(), DEFAULT_SHARDS);
        for i in 0..s.shard_count() {
            assert!(s.shard(i).capacity() as f32 * s.max_load_factor() >= 100.0);
        }
        assert!(s.is_empty());
    }

    #[test]
    fn with_config_rejects_bad_shard_count() {
        let res: Result<ParallelHashSet<u64>, _> = ParallelHashSet::with_config(
            Config::new().with_shard_count(3),
            DefaultHashBuilder::default(),
        );
        assert!(matches!(res, Err(Error::InvalidShardCount { count: 3, .. })));
    }

    #[test]
    fn try_ops_report_a_held_shard() {
        let s: ParallelHashSet<u64> = ParallelHashSet::with_shards(1);
        s.insert(1);
        s.shard(0).with_lock(|_| {
            assert_eq!(s.try_insert(2), Err(Error::WouldBlock { shard: 0 }));
            assert_eq!(s.try_contains(&1), Err(Error::WouldBlock { shard: 0 }));
            assert_eq!(s.try_erase(&1), Err(Error::WouldBlock { shard: 0 }));
        });
        assert_eq!(s.len(), 1);
        assert_eq!(s.try_insert(2), Ok(true));
        assert_eq!(s.try_insert(2), Ok(false));
        assert_eq!(s.try_contains(&2), Ok(true));
        assert_eq!(s.try_erase(&1), Ok(true));
        assert_eq!(sorted(&s), vec![2]);
    }

    #[test]
    fn find_with_and_get_see_the_stored_element() {
        let s: ParallelHashSet<String> = ParallelHashSet::new();
        s.insert("hello".to_string());
        assert_eq!(s.find_with("hello", |v| v.len()), Some(5));
        assert_eq!(s.get("hello").as_deref(), Some("hello"));
        assert_eq!(s.get("nope"), None);
    }

    /// Invariant: with every key colliding, shard and probe position are
    /// shared and equality alone separates the keys.
    #[test]
    fn constant_hasher_still_distinguishes_keys() {
        let s: ParallelHashSet<u32, ConstBuildHasher> = ParallelHashSet::with_hasher(ConstBuildHasher);
        for k in 0..200 {
            assert!(s.insert(k));
        }
        assert_eq!(s.shard_len(0), 200);
        for i in 1..s.shard_count() {
            assert_eq!(s.shard_len(i), 0);
        }
        for k in (0..200).step_by(2) {
            assert!(s.erase(&k));
        }
        for k in 0..200 {
            assert_eq!(s.contains(&k), k % 2 == 1);
        }
        assert_eq!(s.len(), 100);
    }

    #[test]
    fn retain_clear_and_for_each() {
        let s = set_of(4, 0..100u32);
        s.retain(|v| v % 10 == 0);
        let mut seen = BTreeSet::new();
        s.for_each(|v| {
            seen.insert(*v);
        });
        assert_eq!(seen, (0..100).step_by(10).collect());
        let cap = s.capacity();
        s.clear();
        assert!(s.is_empty());
        assert_eq!(s.capacity(), cap);
        s.shrink_to_fit();
        assert_eq!(s.capacity(), 0);
    }

    #[test]
    fn clone_eq_and_swap() {
        let mut a = set_of(4, 0..20u32);
        let mut b = a.clone();
        assert_eq!(a, b);
        b.insert(99);
        assert_ne!(a, b);
        a.swap(&mut b);
        assert!(a.contains(&99));
        assert!(!b.contains(&99));
        let c: ParallelHashSet<u32> = (0..20u32).rev().collect();
        assert_eq!(b, c);
    }

    #[test]
    fn into_iter_yields_everything_once() {
        let s = set_of(8, 0..300u32);
        let all: Vec<u32> = s.into_iter().collect();
        assert_eq!(all.len(), 300);
        assert_eq!(all.into_iter().collect::<BTreeSet<_>>(), (0..300).collect());
    }

    #[test]
    fn iter_is_restartable_and_ordered_by_shard() {
        let s = set_of(4, 0..64u64);
        let first: Vec<u64> = s.iter().collect();
        let second: Vec<u64> = (&s).into_iter().collect();
        assert_eq!(first, second);
        let shards: Vec<usize> = first.iter().map(|k| s.shard_index_of(s.hash(k))).collect();
        assert!(shards.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn debug_lists_elements() {
        let s = set_of(2, [3u8]);
        assert_eq!(format!("{:?}", s), "{3}");
        assert_eq!(s.max_load_factor(), 0.875);
        s.set_max_load_factor(0.5);
        assert_eq!(s.max_load_factor(), 0.875);
    }
}
