//! Runtime substrate for FrankenMutex.
//!
//! The mutex core in `frankenmutex-core` never touches an OS mutex. Everything
//! it needs from the surrounding runtime lives here, behind small interfaces:
//!
//! - **Thread identity** (`thread_id`): opaque, equality-comparable thread ids
//! - **Cancellation** (`cancel`): per-thread cancel type/state, cancel requests,
//!   and the scoped guards that confine delivery to safe points
//! - **Scheduling** (`sched`): the cooperative zero-timeout yield
//! - **Slot latch** (`slot`): exclusive access to a handle's backing memory
//! - **Allocation** (`alloc`): fallible boxing with failure injection
//! - **Configuration** (`config`): runtime safety level control
//! - **Metrics** (`metrics`): atomic branch counters for observability

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod alloc;
pub mod cancel;
pub mod config;
pub mod metrics;
pub mod sched;
#[allow(unsafe_code)]
pub mod slot;
pub mod thread_id;

pub use crate::alloc::{AllocError, try_box};
pub use crate::cancel::{
    AsyncCancelWindow, CancelHandle, CancelState, CancelType, DeferredCancelScope,
    ThreadCanceled,
};
pub use crate::config::SafetyLevel;
pub use crate::metrics::{MutexBranch, MutexMetrics};
pub use crate::slot::{SlotGuard, SlotLatch};
pub use crate::thread_id::{ThreadIdentity, current_thread};
