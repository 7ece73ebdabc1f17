//! Shard: one `ProbingTable` behind its own lock.

use crate::error::Error;
use crate::probing_table::ProbingTable;
use core::fmt;
use parking_lot::lock_api::{Mutex, RawMutex, RawMutexTimed};
use std::time::Duration;

/// One independently locked partition of a `ParallelHashSet`.
///
/// The table is only reachable through the accessors below, which hold
/// the lock for the duration of the closure and release it on every exit
/// path, unwinding included. Calling back into the same shard from inside
/// the closure is not allowed: a real mutex deadlocks, `NullMutex` panics,
/// and the `try_*` accessors report `Error::WouldBlock`.
pub struct Shard<T, R> {
    index: usize,
    table: Mutex<R, ProbingTable<T>>,
}

impl<T, R: RawMutex> Shard<T, R> {
    pub fn new(index: usize) -> Self {
        Self::with_table(index, ProbingTable::new())
    }

    pub fn with_table(index: usize, table: ProbingTable<T>) -> Self {
        Self {
            index,
            table: Mutex::new(table),
        }
    }

    /// Position of this shard in its set.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Runs `f` with the table, blocking until the lock is free.
    #[inline]
    pub fn with_lock<F, U>(&self, f: F) -> U
    where
        F: FnOnce(&mut ProbingTable<T>) -> U,
    {
        let mut guard = self.table.lock();
        f(&mut guard)
    }

    /// Runs `f` only if the lock is free right now.
    pub fn try_with_lock<F, U>(&self, f: F) -> Result<U, Error>
    where
        F: FnOnce(&mut ProbingTable<T>) -> U,
    {
        let mut guard = self
            .table
            .try_lock()
            .ok_or(Error::WouldBlock { shard: self.index })?;
        Ok(f(&mut guard))
    }

    /// Exclusive access without locking.
    #[inline]
    pub fn get_mut(&mut self) -> &mut ProbingTable<T> {
        self.table.get_mut()
    }

    pub fn into_table(self) -> ProbingTable<T> {
        self.table.into_inner()
    }

    pub fn is_locked(&self) -> bool {
        self.table.is_locked()
    }

    pub fn len(&self) -> usize {
        self.with_lock(|t| t.len())
    }

    pub fn is_empty(&self) -> bool {
        self.with_lock(|t| t.is_empty())
    }

    pub fn capacity(&self) -> usize {
        self.with_lock(|t| t.capacity())
    }
}

impl<T, R> Shard<T, R>
where
    R: RawMutexTimed<Duration = Duration>,
{
    /// Runs `f` if the lock can be taken within `timeout`.
    pub fn with_lock_for<F, U>(&self, timeout: Duration, f: F) -> Result<U, Error>
    where
        F: FnOnce(&mut ProbingTable<T>) -> U,
    {
        let mut guard = self.table.try_lock_for(timeout).ok_or(Error::LockTimeout {
            shard: self.index,
            timeout,
        })?;
        Ok(f(&mut guard))
    }
}

impl<T: fmt::Debug, R: RawMutex> fmt::Debug for Shard<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("index", &self.index)
            .field("table", &self.table)
            .finish()
    }
}
