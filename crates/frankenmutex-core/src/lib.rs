//! # frankenmutex-core
//!
//! Safe Rust implementation of a POSIX mutex family (normal, recursive,
//! error-checking) that never touches an OS mutex object.
//!
//! Each mutex handle is a slot latch around a record holding a signed lock
//! index and ownership/fairness bookkeeping. Blocking acquisition releases
//! the latch and yields cooperatively between attempts. The latch, thread
//! identity, cancellation and yield primitives come from
//! `frankenmutex-membrane`. No `unsafe` code is permitted at the crate level.

#![deny(unsafe_code)]

pub mod errno;
pub mod pthread;

pub use pthread::{MutexError, MutexGuard, MutexHandle, MutexSnapshot};
pub use pthread::{MutexAttr, MutexAttrHandle, MutexType, SharingMode};
