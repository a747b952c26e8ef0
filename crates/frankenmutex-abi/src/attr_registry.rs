//! Registry of live attribute objects.
//!
//! Every attribute object handed out by `fm_pthread_mutexattr_init` is
//! recorded here by address until `fm_pthread_mutexattr_destroy` releases it.
//! In hardened mode the abi layer refuses attribute pointers that are not in
//! the registry, so a stale copy of a destroyed handle yields `EINVAL`.

use std::collections::HashSet;
use std::sync::OnceLock;

use frankenmutex_core::MutexAttr;
use parking_lot::RwLock;

fn live() -> &'static RwLock<HashSet<usize>> {
    static LIVE: OnceLock<RwLock<HashSet<usize>>> = OnceLock::new();
    LIVE.get_or_init(|| RwLock::new(HashSet::new()))
}

pub(crate) fn register(attr: *const MutexAttr) {
    live().write().insert(attr as usize);
}

/// Returns false if `attr` was not registered.
pub(crate) fn unregister(attr: *const MutexAttr) -> bool {
    live().write().remove(&(attr as usize))
}

#[must_use]
pub(crate) fn is_live(attr: *const MutexAttr) -> bool {
    live().read().contains(&(attr as usize))
}
