// All extern ABI exports accept raw pointers from C callers; null checks and
// (in hardened mode) registry checks happen at runtime, so per-function
// safety docs would be redundant boilerplate.
#![allow(clippy::missing_safety_doc)]
//! # frankenmutex-abi
//!
//! Error-code boundary for the FrankenMutex family.
//!
//! This crate produces a `cdylib` exporting `fm_pthread_mutex_*` and
//! `fm_pthread_mutexattr_*`. Each entry point checks its pointers and then
//! delegates to the safe implementation in `frankenmutex-core`.
//!
//! ```text
//! C caller -> ABI entry (this crate) -> pointer/registry checks -> core impl -> errno
//! ```
//!
//! Exports use the `"C-unwind"` ABI: a thread canceled at a safe point inside
//! a lock call unwinds through the boundary instead of aborting.
//!
//! In **strict** mode only null pointers are rejected. In **hardened** mode
//! attribute pointers must also be live entries of the attribute registry.

mod attr_registry;

pub mod pthread_abi;
