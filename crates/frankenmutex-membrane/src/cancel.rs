//! Thread cancellation facade.
//!
//! Each thread carries a cancel type (deferred or asynchronous), a cancel
//! state (enabled or disabled), and a pending-request flag that any thread may
//! raise through a [`CancelHandle`] or [`request_cancel`].
//!
//! Delivery unwinds the canceled thread with a [`ThreadCanceled`] payload via
//! `std::panic::resume_unwind`, so destructors run and no panic hook fires.
//! Delivery only happens inside [`test_cancellation`], and only while the
//! thread is enabled *and* asynchronous. Public mutex operations wrap
//! themselves in a [`DeferredCancelScope`], so a thread is never torn down
//! while it holds a slot latch.

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::sched;
use crate::thread_id::{ThreadIdentity, current_thread};

/// When a pending cancellation may be acted upon.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelType {
    /// Only at explicit cancellation points.
    #[default]
    Deferred,
    /// At any instant the facade is consulted.
    Asynchronous,
}

/// Whether cancellation requests are honored at all.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelState {
    #[default]
    Enabled,
    Disabled,
}

/// Unwind payload carried by a canceled thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadCanceled {
    pub thread: ThreadIdentity,
}

/// Returns true if a `join`/`catch_unwind` payload is a cancellation.
#[must_use]
pub fn is_canceled(payload: &(dyn Any + Send)) -> bool {
    payload.is::<ThreadCanceled>()
}

#[derive(Debug, Default)]
struct CancelCell {
    pending: AtomicBool,
}

type CancelRegistry = HashMap<ThreadIdentity, Arc<CancelCell>>;

fn registry() -> &'static RwLock<CancelRegistry> {
    static REGISTRY: OnceLock<RwLock<CancelRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

struct ThreadCancel {
    id: ThreadIdentity,
    kind: Cell<CancelType>,
    state: Cell<CancelState>,
    cell: Arc<CancelCell>,
}

impl ThreadCancel {
    fn register() -> Self {
        let id = current_thread();
        let cell = Arc::new(CancelCell::default());
        registry().write().insert(id, Arc::clone(&cell));
        Self {
            id,
            kind: Cell::new(CancelType::Deferred),
            state: Cell::new(CancelState::Enabled),
            cell,
        }
    }
}

impl Drop for ThreadCancel {
    fn drop(&mut self) {
        registry().write().remove(&self.id);
    }
}

thread_local! {
    static CANCEL: ThreadCancel = ThreadCancel::register();
}

/// Cross-thread handle used to request cancellation of one thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    thread: ThreadIdentity,
    cell: Arc<CancelCell>,
}

impl CancelHandle {
    /// Thread this handle targets.
    #[must_use]
    pub fn thread(&self) -> ThreadIdentity {
        self.thread
    }

    /// Mark a cancellation as pending for the target thread.
    pub fn request(&self) {
        self.cell.pending.store(true, Ordering::Release);
    }

    /// Returns true while a request is pending and undelivered.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.cell.pending.load(Ordering::Acquire)
    }
}

/// Handle for canceling the calling thread from elsewhere.
#[must_use]
pub fn cancel_handle() -> CancelHandle {
    CANCEL.with(|t| CancelHandle {
        thread: t.id,
        cell: Arc::clone(&t.cell),
    })
}

/// Request cancellation of `thread`.
///
/// Returns false if the thread is unknown (never touched the facade, or
/// already exited).
pub fn request_cancel(thread: ThreadIdentity) -> bool {
    match registry().read().get(&thread) {
        Some(cell) => {
            cell.pending.store(true, Ordering::Release);
            true
        }
        None => false,
    }
}

/// Set the calling thread's cancel type, returning the previous one.
pub fn set_cancel_type(new: CancelType) -> CancelType {
    CANCEL
        .try_with(|t| t.kind.replace(new))
        .unwrap_or(CancelType::Deferred)
}

/// The calling thread's current cancel type.
#[must_use]
pub fn cancel_type() -> CancelType {
    CANCEL.try_with(|t| t.kind.get()).unwrap_or_default()
}

/// Set the calling thread's cancel state, returning the previous one.
pub fn set_cancel_state(new: CancelState) -> CancelState {
    CANCEL
        .try_with(|t| t.state.replace(new))
        .unwrap_or(CancelState::Enabled)
}

/// Deliver a pending cancellation if the thread permits asynchronous
/// delivery right now. Does not return in that case.
pub fn test_cancellation() {
    let deliver = CANCEL
        .try_with(|t| {
            t.state.get() == CancelState::Enabled
                && t.kind.get() == CancelType::Asynchronous
                && t.cell.pending.swap(false, Ordering::AcqRel)
        })
        .unwrap_or(false);
    if deliver {
        std::panic::resume_unwind(Box::new(ThreadCanceled {
            thread: current_thread(),
        }));
    }
}

/// Forces deferred cancellation for its lifetime.
///
/// On drop the previous type is restored; if it was asynchronous, a pending
/// request is delivered right after restoration, outside whatever critical
/// section the scope covered. Delivery is skipped while already unwinding.
#[must_use = "the previous cancel type is restored when the scope drops"]
#[derive(Debug)]
pub struct DeferredCancelScope {
    previous: CancelType,
}

impl DeferredCancelScope {
    pub fn enter() -> Self {
        Self {
            previous: set_cancel_type(CancelType::Deferred),
        }
    }

    /// Cancel type in force before the scope was entered.
    #[must_use]
    pub fn previous(&self) -> CancelType {
        self.previous
    }

    #[must_use]
    pub fn was_asynchronous(&self) -> bool {
        self.previous == CancelType::Asynchronous
    }

    /// The cooperative yield of a wait loop. When the caller entered
    /// asynchronous, this is the one window in which it may be canceled.
    pub fn yield_point(&self) {
        if self.was_asynchronous() {
            let _window = AsyncCancelWindow::open();
            sched::yield_now();
        } else {
            sched::yield_now();
        }
    }
}

impl Drop for DeferredCancelScope {
    fn drop(&mut self) {
        set_cancel_type(self.previous);
        if self.was_asynchronous() && !std::thread::panicking() {
            test_cancellation();
        }
    }
}

/// Re-enables asynchronous cancellation, tests for a pending request, and
/// drops back to deferred when closed.
#[derive(Debug)]
pub struct AsyncCancelWindow {
    _private: (),
}

impl AsyncCancelWindow {
    #[must_use]
    pub fn open() -> Self {
        set_cancel_type(CancelType::Asynchronous);
        let window = Self { _private: () };
        test_cancellation();
        window
    }
}

impl Drop for AsyncCancelWindow {
    fn drop(&mut self) {
        set_cancel_type(CancelType::Deferred);
    }
}
