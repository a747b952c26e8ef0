//! Fallible allocation for handle-backed objects.
//!
//! `Box::new` aborts on exhaustion; the mutex and attribute constructors must
//! instead report `ENOMEM`. [`try_box`] goes to the global allocator directly
//! and checks for null. A thread-local injector lets tests force the failure
//! path without exhausting memory.

use std::alloc::{Layout, alloc};
use std::cell::Cell;
use std::fmt;

thread_local! {
    static INJECTED_FAILURES: Cell<u32> = const { Cell::new(0) };
}

/// Allocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    pub size: usize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "allocation of {} bytes failed", self.size)
    }
}

impl std::error::Error for AllocError {}

/// Make the calling thread's next `count` calls to [`try_box`] fail.
pub fn inject_alloc_failures(count: u32) {
    INJECTED_FAILURES.set(count);
}

/// Remaining injected failures on the calling thread.
#[must_use]
pub fn pending_alloc_failures() -> u32 {
    INJECTED_FAILURES.get()
}

fn take_injected_failure() -> bool {
    INJECTED_FAILURES.with(|left| {
        let n = left.get();
        if n == 0 {
            false
        } else {
            left.set(n - 1);
            true
        }
    })
}

/// Move `value` to the heap, reporting exhaustion instead of aborting.
pub fn try_box<T>(value: T) -> Result<Box<T>, AllocError> {
    let layout = Layout::new::<T>();
    if take_injected_failure() {
        return Err(AllocError {
            size: layout.size(),
        });
    }
    if layout.size() == 0 {
        return Ok(Box::new(value));
    }
    // SAFETY: `layout` has non-zero size.
    let ptr = unsafe { alloc(layout) }.cast::<T>();
    if ptr.is_null() {
        return Err(AllocError {
            size: layout.size(),
        });
    }
    // SAFETY: `ptr` is non-null, freshly allocated with `Layout::new::<T>()`,
    // which is exactly the layout `Box<T>` deallocates with.
    unsafe {
        ptr.write(value);
        Ok(Box::from_raw(ptr))
    }
}
