//! Error number definitions used by the mutex family.
//!
//! Values match Linux so the abi layer can hand them straight to C callers.

/// Operation not permitted.
pub const EPERM: i32 = 1;
/// Out of memory.
pub const ENOMEM: i32 = 12;
/// Device or resource busy.
pub const EBUSY: i32 = 16;
/// Invalid argument.
pub const EINVAL: i32 = 22;
/// Resource deadlock would occur.
pub const EDEADLK: i32 = 35;
/// Function not implemented.
pub const ENOSYS: i32 = 38;
