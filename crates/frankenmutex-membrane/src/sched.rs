//! Cooperative scheduling primitive.
//!
//! The mutex wait loop parks nowhere: a blocked locker releases the slot
//! latch, gives up the rest of its time slice, and retries.

/// Zero-timeout yield to other ready threads.
#[inline]
pub fn yield_now() {
    std::thread::yield_now();
}

/// Busy-wait hint for short spins that keep the slot latch held.
#[inline]
pub fn spin_hint() {
    std::hint::spin_loop();
}
