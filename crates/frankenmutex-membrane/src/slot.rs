//! Slot latch: exclusive access to a handle's backing memory.
//!
//! This is the metadata latch of the mutex design. It is held only for the
//! few instructions it takes to inspect or mutate a mutex record, never across
//! a blocking wait, so it is always eventually available. The logical mutex
//! state lives *inside* the latched value.
//!
//! The latch is a single `AtomicBool` plus an `UnsafeCell`. `new` is `const`,
//! so latched values can live in `static` items (lazy-init sentinels).

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::metrics::{self, MutexBranch};
use crate::sched;

/// Spins between cooperative yields while waiting for a held latch.
const SPINS_BEFORE_YIELD: u32 = 64;

/// A value guarded by a tiny test-and-test-and-set latch.
pub struct SlotLatch<T> {
    held: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by `held`; the value is moved
// between threads only through that exclusive access.
unsafe impl<T: Send> Send for SlotLatch<T> {}
// SAFETY: as above; `&SlotLatch` only hands out `&mut T` via a guard that
// owns the latch.
unsafe impl<T: Send> Sync for SlotLatch<T> {}

impl<T> SlotLatch<T> {
    /// Create an unlatched slot holding `value`.
    pub const fn new(value: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    #[inline]
    fn try_claim(&self) -> bool {
        self.held
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquire exclusive access, spinning and then yielding until available.
    pub fn acquire(&self) -> SlotGuard<'_, T> {
        if self.try_claim() {
            return SlotGuard { latch: self };
        }
        metrics::record(MutexBranch::SlotContended);
        let mut spins = 0u32;
        loop {
            while self.held.load(Ordering::Relaxed) {
                if spins < SPINS_BEFORE_YIELD {
                    spins += 1;
                    sched::spin_hint();
                } else {
                    spins = 0;
                    sched::yield_now();
                }
            }
            if self.try_claim() {
                return SlotGuard { latch: self };
            }
        }
    }

    /// Acquire exclusive access only if nobody else holds it right now.
    pub fn try_acquire(&self) -> Option<SlotGuard<'_, T>> {
        if self
            .held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SlotGuard { latch: self })
        } else {
            metrics::record(MutexBranch::SlotTryFailed);
            None
        }
    }

    /// Returns true if some thread currently holds the latch.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    /// Direct access through a unique borrow; no latching needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consume the latch and return the value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for SlotLatch<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for SlotLatch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotLatch")
            .field("held", &self.is_held())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a latched value. Dropping it publishes the value and
/// releases the latch.
pub struct SlotGuard<'a, T> {
    latch: &'a SlotLatch<T>,
}

impl<T> Deref for SlotGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard owns the latch, so no other reference exists.
        unsafe { &*self.latch.value.get() }
    }
}

impl<T> DerefMut for SlotGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard owns the latch, so no other reference exists.
        unsafe { &mut *self.latch.value.get() }
    }
}

impl<T> Drop for SlotGuard<'_, T> {
    fn drop(&mut self) {
        self.latch.held.store(false, Ordering::Release);
    }
}

impl<T: fmt::Debug> fmt::Debug for SlotGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SlotGuard").field(&**self).finish()
    }
}
