//! No-op lock policy for single-threaded sets.
//!
//! `NullMutex` never blocks and never synchronizes. It still records
//! whether it is held so that a second acquisition from the same thread
//! (for example, touching the set from inside a closure that already holds
//! the shard) panics instead of handing out two aliasing guards. It is
//! `Send` but not `Sync`: a set built on it can move between threads but
//! cannot be shared by them.

use core::cell::Cell;
use parking_lot::lock_api::{GuardNoSend, RawMutex};

/// Lock policy that only guards against re-entrant acquisition.
#[derive(Debug)]
pub struct NullMutex {
    held: Cell<bool>,
}

impl NullMutex {
    pub const fn new() -> Self {
        Self {
            held: Cell::new(false),
        }
    }
}

impl Default for NullMutex {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: `held` makes acquisition exclusive within a thread, and the
// `Cell` keeps the type `!Sync`, so no second thread can reach it.
unsafe impl RawMutex for NullMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = NullMutex::new();

    type GuardMarker = GuardNoSend;

    #[inline]
    fn lock(&self) {
        assert!(
            !self.held.replace(true),
            "re-entrant acquisition of a shard lock"
        );
    }

    #[inline]
    fn try_lock(&self) -> bool {
        !self.held.replace(true)
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.held.set(false);
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.held.get()
    }
}

#[cfg(test)]
mod tests {
    use super::NullMutex;
    use parking_lot::lock_api::Mutex;

    #[test]
    fn lock_and_release_is_ok() {
        let m: Mutex<NullMutex, i32> = Mutex::new(1);
        {
            let mut g = m.lock();
            *g += 1;
            assert!(m.is_locked());
        }
        assert!(!m.is_locked());
        assert_eq!(*m.lock(), 2);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let m: Mutex<NullMutex, ()> = Mutex::new(());
        let g = m.lock();
        assert!(m.try_lock().is_none());
        drop(g);
        assert!(m.try_lock().is_some());
    }

    #[test]
    fn reentrant_lock_panics() {
        let m: Mutex<NullMutex, ()> = Mutex::new(());
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _g1 = m.lock();
            let _g2 = m.lock();
        }));
        assert!(res.is_err(), "expected re-entrant acquisition to panic");
        // The first guard was released while unwinding.
        assert!(!m.is_locked());
    }
}
