//! ProbingTable: single-shard open-addressing table with group probing.
//!
//! Elements live inline in a flat slot array next to a parallel array of
//! control bytes (see `group`). The table never hashes: callers pass the
//! precomputed hash and an equality predicate, and each full slot keeps its
//! hash so a rehash never calls back into user `Hash` code.
//!
//! Erase leaves a tombstone. Tombstones and the free budget are reclaimed
//! only by a rehash of this table, so an index returned by `find` or
//! `insert` stays valid until the next rehash.

use crate::error::Error;
use crate::group::{self, Group, ProbeSeq, DELETED, EMPTY};
use core::fmt;
use core::mem;
use tracing::{trace, warn};

/// Maximum load, counting tombstones, as a fraction of buckets.
const MAX_LOAD_NUM: usize = 7;
const MAX_LOAD_DEN: usize = 8;

/// `len / capacity` never exceeds this.
pub const MAX_LOAD_FACTOR: f32 = MAX_LOAD_NUM as f32 / MAX_LOAD_DEN as f32;

/// Contents of one bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Slot<T> {
    Empty,
    Deleted,
    Full { hash: u64, value: T },
}

impl<T> Slot<T> {
    #[inline]
    pub fn is_full(&self) -> bool {
        matches!(self, Slot::Full { .. })
    }

    #[inline]
    pub fn value(&self) -> Option<&T> {
        match self {
            Slot::Full { value, .. } => Some(value),
            _ => None,
        }
    }

    #[inline]
    fn into_value(self) -> Option<T> {
        match self {
            Slot::Full { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Outcome of an insert: where the element is, and whether it is new.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertResult<T> {
    /// The value was stored at this index.
    Inserted(usize),
    /// An equal element already sits at `index`; the candidate is handed back.
    Occupied { index: usize, rejected: T },
}

impl<T> InsertResult<T> {
    pub fn index(&self) -> usize {
        match self {
            InsertResult::Inserted(index) | InsertResult::Occupied { index, .. } => *index,
        }
    }

    pub fn inserted(&self) -> bool {
        matches!(self, InsertResult::Inserted(_))
    }
}

/// Usable slots for a bucket count.
#[inline]
fn usable(buckets: usize) -> usize {
    buckets / MAX_LOAD_DEN * MAX_LOAD_NUM
}

/// Smallest valid bucket count with at least `min_buckets` buckets.
fn normalize_buckets(min_buckets: usize) -> Result<usize, Error> {
    if min_buckets == 0 {
        return Ok(0);
    }
    min_buckets
        .max(Group::WIDTH)
        .checked_next_power_of_two()
        .ok_or(Error::CapacityOverflow)
}

/// Smallest valid bucket count that holds `items` under the max load.
fn capacity_to_buckets(items: usize) -> Result<usize, Error> {
    let min_buckets = items
        .checked_mul(MAX_LOAD_DEN)
        .ok_or(Error::CapacityOverflow)?
        .div_ceil(MAX_LOAD_NUM);
    normalize_buckets(min_buckets)
}

#[track_caller]
fn infallible<R>(res: Result<R, Error>) -> R {
    match res {
        Ok(r) => r,
        Err(err) => panic!("{err}"),
    }
}

/// Open-addressing table for one shard.
///
/// Capacity is zero (nothing allocated) or a power of two no smaller than
/// one probe group.
#[derive(Clone)]
pub struct ProbingTable<T> {
    // buckets + Group::WIDTH bytes; the tail mirrors the first group.
    ctrl: Vec<u8>,
    slots: Vec<Slot<T>>,
    items: usize,
    tombstones: usize,
    // Inserts into EMPTY slots left before the max load is reached.
    growth_left: usize,
}

impl<T> Default for ProbingTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ProbingTable<T> {
    pub const fn new() -> Self {
        Self {
            ctrl: Vec::new(),
            slots: Vec::new(),
            items: 0,
            tombstones: 0,
            growth_left: 0,
        }
    }

    /// Table with room for `capacity` elements. Panics if the slot array
    /// cannot be allocated.
    pub fn with_capacity(capacity: usize) -> Self {
        infallible(Self::try_with_capacity(capacity))
    }

    pub fn try_with_capacity(capacity: usize) -> Result<Self, Error> {
        let mut table = Self::new();
        if capacity > 0 {
            table.resize(capacity_to_buckets(capacity)?)?;
        }
        Ok(table)
    }

    /// Bucket count a table needs to hold `capacity` elements, or
    /// `CapacityOverflow` if its slot array could never be addressed.
    /// Allocates nothing.
    pub fn buckets_for(capacity: usize) -> Result<usize, Error> {
        let buckets = capacity_to_buckets(capacity)?;
        Self::check_layout(buckets)?;
        Ok(buckets)
    }

    fn check_layout(buckets: usize) -> Result<(), Error> {
        let too_big = buckets
            .checked_mul(mem::size_of::<Slot<T>>())
            .map_or(true, |bytes| bytes > isize::MAX as usize);
        if too_big {
            return Err(Error::CapacityOverflow);
        }
        Ok(())
    }

    fn allocate(buckets: usize) -> Result<(Vec<u8>, Vec<Slot<T>>), Error> {
        if buckets == 0 {
            return Ok((Vec::new(), Vec::new()));
        }
        Self::check_layout(buckets)?;
        let mut ctrl = Vec::new();
        let mut slots = Vec::new();
        if ctrl.try_reserve_exact(buckets + Group::WIDTH).is_err()
            || slots.try_reserve_exact(buckets).is_err()
        {
            return Err(Error::AllocFailed { slots: buckets });
        }
        ctrl.resize(buckets + Group::WIDTH, EMPTY);
        slots.resize_with(buckets, || Slot::Empty);
        Ok((ctrl, slots))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Total slots: full, deleted and empty.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Elements that fit before the next growth, ignoring tombstone reuse.
    #[inline]
    pub fn growth_left(&self) -> usize {
        self.growth_left
    }

    pub fn load_factor(&self) -> f32 {
        if self.slots.is_empty() {
            0.0
        } else {
            self.items as f32 / self.slots.len() as f32
        }
    }

    pub fn max_load_factor(&self) -> f32 {
        MAX_LOAD_FACTOR
    }

    #[inline]
    fn bucket_mask(&self) -> usize {
        self.slots.len() - 1
    }

    /// Writes a control byte and its mirror past the end of the array.
    ///
    /// For `index >= WIDTH` both positions are `index`; otherwise the
    /// mirror is `buckets + index`.
    #[inline]
    fn set_ctrl(&mut self, index: usize, ctrl: u8) {
        let mirror = (index.wrapping_sub(Group::WIDTH) & self.bucket_mask()) + Group::WIDTH;
        self.ctrl[index] = ctrl;
        self.ctrl[mirror] = ctrl;
    }

    /// Index of the element equal to the probe, if any.
    pub fn find(&self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<usize> {
        if self.items == 0 {
            return None;
        }
        let h2 = group::h2(hash);
        let mask = self.bucket_mask();
        let mut seq = ProbeSeq::new(hash, mask);
        for _ in 0..self.slots.len() / Group::WIDTH {
            let g = Group::load(&self.ctrl, seq.pos);
            for bit in g.match_byte(h2) {
                let index = (seq.pos + bit) & mask;
                if let Slot::Full { hash: h, value } = &self.slots[index] {
                    if *h == hash && eq(value) {
                        return Some(index);
                    }
                }
            }
            if g.match_empty().any_bit_set() {
                return None;
            }
            seq.move_next(mask);
        }
        None
    }

    /// First EMPTY or DELETED slot on the probe sequence. The table must be
    /// allocated and hold at least one non-full slot, which the load bound
    /// guarantees.
    fn find_insert_slot(&self, hash: u64) -> usize {
        let mask = self.bucket_mask();
        let mut seq = ProbeSeq::new(hash, mask);
        for _ in 0..self.slots.len() / Group::WIDTH {
            let g = Group::load(&self.ctrl, seq.pos);
            if let Some(bit) = g.match_empty_or_deleted().lowest_set_bit() {
                return (seq.pos + bit) & mask;
            }
            seq.move_next(mask);
        }
        unreachable!("probing table has no free slot")
    }

    fn record_insert_at(&mut self, index: usize, hash: u64, value: T) {
        debug_assert!(!group::is_full(self.ctrl[index]), "insert into a full slot");
        if self.ctrl[index] == EMPTY {
            self.growth_left -= 1;
        } else {
            self.tombstones -= 1;
        }
        self.set_ctrl(index, group::h2(hash));
        self.slots[index] = Slot::Full { hash, value };
        self.items += 1;
    }

    /// Inserts `value` unless an element equal to it is present.
    ///
    /// `eq(existing, candidate)` decides equality. The first inserted of
    /// several equal values wins; later ones come back in
    /// `InsertResult::Occupied`. Panics if growing the table fails.
    pub fn insert(
        &mut self,
        hash: u64,
        value: T,
        eq: impl FnMut(&T, &T) -> bool,
    ) -> InsertResult<T> {
        infallible(self.try_insert(hash, value, eq))
    }

    /// Like `insert`, but a failed growth is returned instead of panicking.
    /// The table is unchanged on error and `value` is dropped.
    pub fn try_insert(
        &mut self,
        hash: u64,
        value: T,
        mut eq: impl FnMut(&T, &T) -> bool,
    ) -> Result<InsertResult<T>, Error> {
        if let Some(index) = self.find(hash, |existing| eq(existing, &value)) {
            return Ok(InsertResult::Occupied {
                index,
                rejected: value,
            });
        }
        let needs_growth = self.slots.is_empty() || {
            let index = self.find_insert_slot(hash);
            self.ctrl[index] == EMPTY && self.growth_left == 0
        };
        if needs_growth {
            self.reserve_rehash(1)?;
        }
        let index = self.find_insert_slot(hash);
        self.record_insert_at(index, hash, value);
        Ok(InsertResult::Inserted(index))
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Slot::value)
    }

    #[inline]
    pub fn slot(&self, index: usize) -> Option<&Slot<T>> {
        self.slots.get(index)
    }

    /// Takes the element at `index` out, leaving a tombstone. Other indices
    /// are untouched and capacity does not shrink.
    pub fn erase(&mut self, index: usize) -> Option<T> {
        let taken = match self.slots.get_mut(index) {
            Some(slot) if slot.is_full() => mem::replace(slot, Slot::Deleted),
            _ => return None,
        };
        self.set_ctrl(index, DELETED);
        self.items -= 1;
        self.tombstones += 1;
        taken.into_value()
    }

    pub fn remove(&mut self, hash: u64, eq: impl FnMut(&T) -> bool) -> Option<T> {
        let index = self.find(hash, eq)?;
        self.erase(index)
    }

    /// Drops every element; keeps the allocation.
    pub fn clear(&mut self) {
        self.ctrl.fill(EMPTY);
        self.slots.iter_mut().for_each(|s| *s = Slot::Empty);
        self.items = 0;
        self.tombstones = 0;
        self.growth_left = usable(self.slots.len());
    }

    /// Erases every element for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        for index in 0..self.slots.len() {
            let drop_it = self.slots[index].value().map_or(false, |v| !keep(v));
            if drop_it {
                self.erase(index);
            }
        }
    }

    /// Moves each element through `f`. What `f` hands back is put back in
    /// the same slot; elements it keeps are erased. Returns how many were
    /// taken.
    pub fn retain_owned(&mut self, mut f: impl FnMut(T) -> Option<T>) -> usize {
        let mut taken = 0;
        for index in 0..self.slots.len() {
            let (hash, value) = match mem::replace(&mut self.slots[index], Slot::Deleted) {
                Slot::Full { hash, value } => (hash, value),
                other => {
                    self.slots[index] = other;
                    continue;
                }
            };
            // Account for the removal first so a panic in `f` leaves the
            // table consistent.
            self.set_ctrl(index, DELETED);
            self.items -= 1;
            self.tombstones += 1;
            match f(value) {
                Some(value) => {
                    self.tombstones -= 1;
                    self.items += 1;
                    self.set_ctrl(index, group::h2(hash));
                    self.slots[index] = Slot::Full { hash, value };
                }
                None => taken += 1,
            }
        }
        taken
    }

    /// Grows so that `additional` more elements fit without another
    /// growth. Panics if the allocation fails.
    pub fn reserve(&mut self, additional: usize) {
        infallible(self.try_reserve(additional))
    }

    pub fn try_reserve(&mut self, additional: usize) -> Result<(), Error> {
        if additional > self.growth_left {
            self.reserve_rehash(additional)?;
        }
        Ok(())
    }

    fn reserve_rehash(&mut self, additional: usize) -> Result<(), Error> {
        let new_items = self
            .items
            .checked_add(additional)
            .ok_or(Error::CapacityOverflow)?;
        let full_capacity = usable(self.slots.len());
        if new_items <= full_capacity / 2 {
            // Enough room once the tombstones are gone.
            self.resize(self.slots.len())
        } else {
            self.resize(capacity_to_buckets(new_items.max(full_capacity + 1))?)
        }
    }

    /// Rebuilds the table with at least `buckets` slots and room for every
    /// live element, dropping all tombstones. `rehash(0)` on an empty table
    /// releases the allocation. Invalidates all indices. Panics if the
    /// allocation fails.
    pub fn rehash(&mut self, buckets: usize) {
        infallible(self.try_rehash(buckets))
    }

    pub fn try_rehash(&mut self, buckets: usize) -> Result<(), Error> {
        let for_items = self
            .items
            .checked_mul(MAX_LOAD_DEN)
            .ok_or(Error::CapacityOverflow)?
            .div_ceil(MAX_LOAD_NUM);
        self.resize(normalize_buckets(buckets.max(for_items))?)
    }

    pub fn shrink_to_fit(&mut self) {
        self.rehash(0)
    }

    /// Moves every element into a fresh array of `buckets` slots. The old
    /// arrays are only replaced once the new ones are allocated.
    fn resize(&mut self, buckets: usize) -> Result<(), Error> {
        debug_assert!(buckets == 0 || (buckets.is_power_of_two() && buckets >= Group::WIDTH));
        debug_assert!(usable(buckets) >= self.items);
        let (ctrl, slots) = Self::allocate(buckets).map_err(|err| {
            warn!(buckets, items = self.items, error = %err, "probing table growth failed");
            err
        })?;
        let old_buckets = self.slots.len();
        let reclaimed = self.tombstones;
        let items = self.items;
        let old_slots = mem::replace(&mut self.slots, slots);
        self.ctrl = ctrl;
        self.items = 0;
        self.tombstones = 0;
        self.growth_left = usable(buckets);
        for slot in old_slots {
            if let Slot::Full { hash, value } = slot {
                let index = self.find_insert_slot(hash);
                self.record_insert_at(index, hash, value);
            }
        }
        debug_assert_eq!(self.items, items);
        trace!(
            from = old_buckets,
            to = buckets,
            items,
            reclaimed,
            "probing table resized"
        );
        Ok(())
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            slots: self.slots.iter(),
            remaining: self.items,
        }
    }

    /// First element at or after `index`, with its index.
    pub fn iter_from(&self, index: usize) -> Option<(usize, &T)> {
        self.slots
            .get(index..)?
            .iter()
            .enumerate()
            .find_map(|(offset, slot)| slot.value().map(|v| (index + offset, v)))
    }

    /// Removes and yields every element. Whatever is not consumed is dropped
    /// with the iterator; the allocation is kept.
    pub fn drain(&mut self) -> Drain<'_, T> {
        Drain {
            table: self,
            index: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        let buckets = self.slots.len();
        if buckets == 0 {
            assert!(self.ctrl.is_empty());
            assert_eq!((self.items, self.tombstones, self.growth_left), (0, 0, 0));
            return;
        }
        assert!(buckets.is_power_of_two() && buckets >= Group::WIDTH);
        assert_eq!(self.ctrl.len(), buckets + Group::WIDTH);
        let full = self.slots.iter().filter(|s| s.is_full()).count();
        let deleted = self
            .slots
            .iter()
            .filter(|s| matches!(s, Slot::Deleted))
            .count();
        assert_eq!(full, self.items, "len must equal the number of full slots");
        assert_eq!(deleted, self.tombstones);
        assert_eq!(self.items + self.tombstones + self.growth_left, usable(buckets));
        for (i, slot) in self.slots.iter().enumerate() {
            let expected = match slot {
                Slot::Empty => EMPTY,
                Slot::Deleted => DELETED,
                Slot::Full { hash, .. } => group::h2(*hash),
            };
            assert_eq!(self.ctrl[i], expected, "control byte {i}");
            assert_eq!(group::is_full(self.ctrl[i]), slot.is_full());
        }
        assert_eq!(&self.ctrl[buckets..], &self.ctrl[..Group::WIDTH]);
    }
}

impl<T: fmt::Debug> fmt::Debug for ProbingTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the elements of a `ProbingTable`, in slot order.
pub struct Iter<'a, T> {
    slots: core::slice::Iter<'a, Slot<T>>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    #[inline]
    fn next(&mut self) -> Option<&'a T> {
        if self.remaining == 0 {
            return None;
        }
        let value = self.slots.find_map(Slot::value)?;
        self.remaining -= 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<'a, T> IntoIterator for &'a ProbingTable<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Owning iterator over the elements of a `ProbingTable`.
pub struct IntoIter<T> {
    slots: std::vec::IntoIter<Slot<T>>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<T> {
        self.slots.find_map(Slot::into_value)
    }
}

impl<T> IntoIterator for ProbingTable<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            slots: self.slots.into_iter(),
        }
    }
}

/// Draining iterator returned by `ProbingTable::drain`.
pub struct Drain<'a, T> {
    table: &'a mut ProbingTable<T>,
    index: usize,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while self.index < self.table.slots.len() {
            let index = self.index;
            self.index += 1;
            if let Some(value) = self.table.erase(index) {
                return Some(value);
            }
        }
        None
    }
}

impl<T> Drop for Drain<'_, T> {
    fn drop(&mut self) {
        self.table.clear();
    }
}
