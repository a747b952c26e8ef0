//! ABI layer for the FrankenMutex `pthread_mutex*` family.
//!
//! Attribute objects live on the heap; `fm_pthread_mutexattr_t` is a pointer
//! to one. Mutexes live in caller storage ([`FmMutex`]), initialized either by
//! `fm_pthread_mutex_init` or by copying [`FM_PTHREAD_MUTEX_INITIALIZER`].
//! Every function returns `0` or a POSIX errno value.

#![allow(non_camel_case_types)]
// `FmMutex` is opaque to C callers: they only ever hold pointers to it.
#![allow(improper_ctypes_definitions)]

use std::ffi::c_int;

use frankenmutex_core::pthread::errno_result;
use frankenmutex_core::{
    MutexAttr, MutexAttrHandle, MutexError, MutexHandle, MutexType, SharingMode,
};
use frankenmutex_membrane::config::safety_level;
use frankenmutex_membrane::metrics::{MetricsSnapshot, global_metrics};

use crate::attr_registry;

/// Pointer to a heap mutex-attribute object; null once destroyed.
pub type fm_pthread_mutexattr_t = *mut MutexAttr;

/// Caller-owned mutex storage.
#[repr(C)]
pub struct FmMutex {
    handle: MutexHandle,
}

pub type fm_pthread_mutex_t = FmMutex;

/// Static initializer: the mutex is built on first lock or try-lock.
#[allow(clippy::declare_interior_mutable_const)]
pub const FM_PTHREAD_MUTEX_INITIALIZER: FmMutex = FmMutex {
    handle: MutexHandle::new_static(),
};

impl FmMutex {
    /// Rust-side access to the underlying handle.
    #[must_use]
    pub fn handle(&self) -> &MutexHandle {
        &self.handle
    }
}

/// Resolve `*attr` to a live attribute object.
unsafe fn resolve_attr(
    attr: *const fm_pthread_mutexattr_t,
) -> Result<*mut MutexAttr, MutexError> {
    if attr.is_null() {
        return Err(MutexError::InvalidArgument);
    }
    // SAFETY: non-null; the caller passes a readable attribute handle slot.
    let raw = unsafe { *attr };
    if raw.is_null() {
        return Err(MutexError::InvalidArgument);
    }
    if safety_level().registry_validation_enabled() && !attr_registry::is_live(raw) {
        return Err(MutexError::InvalidArgument);
    }
    Ok(raw)
}

// ---------------------------------------------------------------------------
// Attribute objects
// ---------------------------------------------------------------------------

/// POSIX `pthread_mutexattr_init`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn fm_pthread_mutexattr_init(
    attr: *mut fm_pthread_mutexattr_t,
) -> c_int {
    if attr.is_null() {
        return libc::EINVAL;
    }
    let boxed = match MutexAttrHandle::create().map(MutexAttrHandle::into_box) {
        Ok(Some(boxed)) => boxed,
        Ok(None) => return libc::ENOMEM,
        Err(err) => return err.errno(),
    };
    let raw = Box::into_raw(boxed);
    attr_registry::register(raw);
    // SAFETY: non-null caller slot.
    unsafe { *attr = raw };
    0
}

/// POSIX `pthread_mutexattr_destroy`. Nulls the caller's handle.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn fm_pthread_mutexattr_destroy(
    attr: *mut fm_pthread_mutexattr_t,
) -> c_int {
    // SAFETY: `resolve_attr` checks the slot pointer before reading it.
    let raw = match unsafe { resolve_attr(attr) } {
        Ok(raw) => raw,
        Err(err) => return err.errno(),
    };
    attr_registry::unregister(raw);
    // SAFETY: `raw` came from `Box::into_raw` in `fm_pthread_mutexattr_init`
    // and is released exactly once, here.
    let mut handle = MutexAttrHandle::from_box(unsafe { Box::from_raw(raw) });
    let rc = errno_result(handle.destroy());
    // SAFETY: `attr` was checked non-null by `resolve_attr`.
    unsafe { *attr = std::ptr::null_mut() };
    rc
}

/// POSIX `pthread_mutexattr_getpshared`. On failure a non-null `pshared`
/// receives `PTHREAD_PROCESS_PRIVATE`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn fm_pthread_mutexattr_getpshared(
    attr: *const fm_pthread_mutexattr_t,
    pshared: *mut c_int,
) -> c_int {
    if pshared.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: `resolve_attr` checks the slot pointer; a resolved object is live.
    let mode = unsafe { resolve_attr(attr) }.map(|raw| unsafe { (*raw).sharing() });
    // SAFETY: non-null caller out-pointer.
    unsafe { *pshared = mode.unwrap_or_default().as_raw() };
    match mode {
        Ok(_) => 0,
        Err(err) => err.errno(),
    }
}

/// POSIX `pthread_mutexattr_setpshared`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn fm_pthread_mutexattr_setpshared(
    attr: *mut fm_pthread_mutexattr_t,
    pshared: c_int,
) -> c_int {
    // SAFETY: `resolve_attr` checks the slot pointer before reading it.
    let raw = match unsafe { resolve_attr(attr) } {
        Ok(raw) => raw,
        Err(err) => return err.errno(),
    };
    let Some(mode) = SharingMode::from_raw(pshared) else {
        return libc::EINVAL;
    };
    // SAFETY: resolved attribute objects are live heap allocations.
    errno_result(unsafe { (*raw).set_sharing(mode) })
}

/// POSIX `pthread_mutexattr_gettype`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn fm_pthread_mutexattr_gettype(
    attr: *const fm_pthread_mutexattr_t,
    kind: *mut c_int,
) -> c_int {
    if kind.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: `resolve_attr` checks the slot pointer before reading it.
    let raw = match unsafe { resolve_attr(attr) } {
        Ok(raw) => raw,
        Err(err) => return err.errno(),
    };
    // SAFETY: live attribute object; non-null caller out-pointer.
    unsafe { *kind = (*raw).kind().as_raw() };
    0
}

/// POSIX `pthread_mutexattr_settype`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn fm_pthread_mutexattr_settype(
    attr: *mut fm_pthread_mutexattr_t,
    kind: c_int,
) -> c_int {
    // SAFETY: `resolve_attr` checks the slot pointer before reading it.
    let raw = match unsafe { resolve_attr(attr) } {
        Ok(raw) => raw,
        Err(err) => return err.errno(),
    };
    let Some(kind) = MutexType::from_raw(kind) else {
        return libc::EINVAL;
    };
    // SAFETY: resolved attribute objects are live heap allocations.
    unsafe { (*raw).set_kind(kind) };
    0
}

// ---------------------------------------------------------------------------
// Mutexes
// ---------------------------------------------------------------------------

/// POSIX `pthread_mutex_init`.
///
/// A null `attr`, or a null attribute handle, selects the defaults. The
/// storage is treated as uninitialized and overwritten.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn fm_pthread_mutex_init(
    mutex: *mut FmMutex,
    attr: *const fm_pthread_mutexattr_t,
) -> c_int {
    if mutex.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: a non-null `attr` points at a readable handle slot.
    let supplied = !attr.is_null() && !unsafe { *attr }.is_null();
    let attr_value = if supplied {
        // SAFETY: `resolve_attr` checks the slot pointer before reading it.
        match unsafe { resolve_attr(attr) } {
            // SAFETY: resolved attribute objects are live heap allocations.
            Ok(raw) => Some(unsafe { *raw }),
            Err(err) => return err.errno(),
        }
    } else {
        None
    };
    // SAFETY: caller-owned storage for an `FmMutex`; may hold garbage.
    unsafe {
        mutex.write(FmMutex {
            handle: MutexHandle::null(),
        });
    }
    // SAFETY: just initialized above.
    errno_result(unsafe { &*mutex }.handle.create(attr_value.as_ref()))
}

/// POSIX `pthread_mutex_destroy`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn fm_pthread_mutex_destroy(mutex: *mut FmMutex) -> c_int {
    if mutex.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: non-null caller storage holding an `FmMutex`.
    errno_result(unsafe { &*mutex }.handle.destroy())
}

/// POSIX `pthread_mutex_lock`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn fm_pthread_mutex_lock(mutex: *mut FmMutex) -> c_int {
    if mutex.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: non-null caller storage holding an `FmMutex`.
    errno_result(unsafe { &*mutex }.handle.lock())
}

/// POSIX `pthread_mutex_unlock`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn fm_pthread_mutex_unlock(mutex: *mut FmMutex) -> c_int {
    if mutex.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: non-null caller storage holding an `FmMutex`.
    errno_result(unsafe { &*mutex }.handle.unlock())
}

/// POSIX `pthread_mutex_trylock`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn fm_pthread_mutex_trylock(mutex: *mut FmMutex) -> c_int {
    if mutex.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: non-null caller storage holding an `FmMutex`.
    errno_result(unsafe { &*mutex }.handle.try_lock())
}

// ---------------------------------------------------------------------------
// Test hooks
// ---------------------------------------------------------------------------

/// Test hook: zero the locking branch counters.
#[doc(hidden)]
pub fn fm_pthread_mutex_reset_state_for_tests() {
    global_metrics().reset();
}

/// Test hook: snapshot the locking branch counters.
#[doc(hidden)]
#[must_use]
pub fn fm_pthread_mutex_branch_counters_for_tests() -> MetricsSnapshot {
    global_metrics().snapshot()
}
