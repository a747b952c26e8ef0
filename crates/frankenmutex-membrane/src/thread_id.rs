//! Opaque thread identity.
//!
//! Ids are handed out lazily from a process-wide counter the first time a
//! thread asks for its own identity, and are never reused. The mutex core
//! only ever compares them for equality.

use std::cell::Cell;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static SELF_ID: Cell<Option<ThreadIdentity>> = const { Cell::new(None) };
}

/// Identity of a thread, comparable for equality only.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadIdentity(NonZeroU64);

impl ThreadIdentity {
    /// Raw numeric form, for logs and diagnostics.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for ThreadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadIdentity({})", self.0)
    }
}

fn fresh_thread_id() -> ThreadIdentity {
    let raw = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    // The counter starts at 1 and would need 2^64 threads to wrap.
    ThreadIdentity(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
}

/// Identity of the calling thread.
#[must_use]
pub fn current_thread() -> ThreadIdentity {
    SELF_ID.with(|slot| {
        if let Some(existing) = slot.get() {
            return existing;
        }
        let id = fresh_thread_id();
        slot.set(Some(id));
        id
    })
}
