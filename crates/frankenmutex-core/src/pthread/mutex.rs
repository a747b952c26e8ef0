//! POSIX mutex operations.
//!
//! A mutex is a [`MutexHandle`]: a slot latch around one of three values. The
//! slot is empty (never valid, or destroyed), holds the lazy-init sentinel
//! (statically initialized, not yet used), or owns a heap [`MutexRecord`].
//!
//! The logical lock is the record's `lock_index`: `-1` when free, the
//! recursion depth minus one while held. Every record field is read and
//! written only while the slot latch is held; blocked lockers release the
//! latch, yield once, and retry. There is no wait queue. Instead, a thread
//! that just released the mutex defers to parked waiters when it tries to
//! take it straight back.
//!
//! Every public operation runs inside a [`DeferredCancelScope`], so a thread
//! holding the latch is never torn down. The one cancellation window of a
//! blocked locker is the yield in its wait loop.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use frankenmutex_membrane::metrics::{self, MutexBranch};
use frankenmutex_membrane::{
    DeferredCancelScope, SlotLatch, ThreadIdentity, current_thread, sched, try_box,
};

use super::error::MutexError;
use super::mutexattr::{MutexAttr, MutexType, SharingMode};

/// Value of `lock_index` for a free mutex.
const UNLOCKED: i32 = -1;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Per-mutex bookkeeping. Lives behind the slot latch.
#[derive(Debug)]
struct MutexRecord {
    /// Resolved discipline; never `Default`.
    kind: MutexType,
    sharing: SharingMode,
    lock_index: AtomicI32,
    owner: Option<ThreadIdentity>,
    /// Advisory count of threads parked in the wait loop. May overcount after
    /// a canceled wait; the stale-waiter rule repairs it.
    waiters: u32,
    last_owner: Option<ThreadIdentity>,
    last_waiter: Option<ThreadIdentity>,
    /// Raised while a try-lock evaluates `lock_index`.
    try_lock_guard: AtomicU32,
}

/// Step of a blocking acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    /// Increment `lock_index` and classify the result.
    Attempting,
    /// Won the counter but yields to parked waiters.
    Deferring,
    /// Wait bookkeeping done; release the slot, yield, retry.
    Waiting,
    Acquired,
    Failed(MutexError),
}

impl MutexRecord {
    fn new(attr: Option<&MutexAttr>) -> Self {
        let attr = attr.copied().unwrap_or_default();
        Self {
            kind: attr.kind().resolve(),
            sharing: attr.sharing(),
            lock_index: AtomicI32::new(UNLOCKED),
            owner: None,
            waiters: 0,
            last_owner: None,
            last_waiter: None,
            try_lock_guard: AtomicU32::new(0),
        }
    }

    fn boxed(attr: Option<&MutexAttr>) -> Result<Box<Self>, MutexError> {
        Ok(try_box(Self::new(attr))?)
    }

    fn take(&mut self, me: ThreadIdentity) {
        self.owner = Some(me);
        self.last_owner = Some(me);
        self.last_waiter = None;
    }

    /// Advance a blocking acquire by one step.
    fn step(&mut self, state: LockState, me: ThreadIdentity) -> LockState {
        match state {
            LockState::Attempting => self.attempt(me),
            LockState::Deferring => {
                metrics::record(MutexBranch::FairnessDeferral);
                self.enter_wait(me);
                LockState::Waiting
            }
            other => other,
        }
    }

    fn attempt(&mut self, me: ThreadIdentity) -> LockState {
        if self.lock_index.fetch_add(1, Ordering::AcqRel) == UNLOCKED {
            if self.waiters > 0 && self.last_owner == Some(me) {
                if self.last_waiter != Some(me) {
                    return LockState::Deferring;
                }
                metrics::record(MutexBranch::StaleWaiterReset);
                self.waiters = 0;
            }
            self.take(me);
            return LockState::Acquired;
        }

        self.wait_for_try_lock();
        let owned = self.owner == Some(me);
        match self.kind {
            kind if owned && kind.is_recursive() => {
                self.take(me);
                LockState::Acquired
            }
            MutexType::ErrorCheck if owned => {
                // The failed relock leaves no trace in the depth counter.
                self.lock_index.fetch_sub(1, Ordering::AcqRel);
                metrics::record(MutexBranch::DeadlockReported);
                LockState::Failed(MutexError::Deadlock)
            }
            _ => {
                self.enter_wait(me);
                LockState::Waiting
            }
        }
    }

    fn wait_for_try_lock(&self) {
        while self.try_lock_guard.load(Ordering::Acquire) != 0 {
            metrics::record(MutexBranch::TryLockGuardSpin);
            sched::spin_hint();
        }
    }

    fn enter_wait(&mut self, me: ThreadIdentity) {
        self.waiters = self.waiters.saturating_add(1);
        self.last_waiter = Some(me);
        self.lock_index.fetch_sub(1, Ordering::AcqRel);
    }

    fn leave_wait(&mut self) {
        if self.waiters > 0 {
            self.waiters -= 1;
        }
    }

    fn release(&mut self, me: ThreadIdentity) -> Result<(), MutexError> {
        if self.owner != Some(me) {
            return Err(MutexError::PermissionDenied);
        }
        // A recursive owner keeps ownership until the outermost unlock.
        if !self.kind.is_recursive() || self.lock_index.load(Ordering::Acquire) == 0 {
            self.owner = None;
        }
        self.lock_index.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    fn try_take(&mut self, me: ThreadIdentity) -> Result<(), MutexError> {
        if self.lock_index.load(Ordering::Acquire) != UNLOCKED {
            return Err(MutexError::Busy);
        }
        self.try_lock_guard.fetch_add(1, Ordering::AcqRel);
        let outcome = if self.lock_index.fetch_add(1, Ordering::AcqRel) == UNLOCKED {
            self.take(me);
            Ok(())
        } else {
            self.lock_index.fetch_sub(1, Ordering::AcqRel);
            Err(MutexError::Busy)
        };
        self.try_lock_guard.fetch_sub(1, Ordering::AcqRel);
        outcome
    }

    fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            kind: self.kind,
            sharing: self.sharing,
            lock_index: self.lock_index.load(Ordering::Acquire),
            owner: self.owner,
            waiters: self.waiters,
            last_owner: self.last_owner,
            last_waiter: self.last_waiter,
            try_lock_guard: self.try_lock_guard.load(Ordering::Acquire),
        }
    }
}

// ---------------------------------------------------------------------------
// Slot value
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum MutexSlot {
    /// Never valid, or destroyed.
    Empty,
    /// Statically initialized; materialized on first lock or try-lock.
    AutoInit,
    Constructed(Box<MutexRecord>),
}

impl MutexSlot {
    fn record_mut(&mut self) -> Result<&mut MutexRecord, MutexError> {
        match self {
            Self::Constructed(record) => Ok(&mut **record),
            Self::Empty | Self::AutoInit => Err(MutexError::InvalidArgument),
        }
    }

    /// Construct a sentinel in place with default attributes. On allocation
    /// failure the sentinel stays.
    fn materialize(&mut self) -> Result<&mut MutexRecord, MutexError> {
        if matches!(self, Self::AutoInit) {
            let record = MutexRecord::boxed(None)?;
            metrics::record(MutexBranch::LazyInit);
            *self = Self::Constructed(record);
        }
        self.record_mut()
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Point-in-time copy of a constructed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSnapshot {
    pub kind: MutexType,
    pub sharing: SharingMode,
    pub lock_index: i32,
    pub owner: Option<ThreadIdentity>,
    pub waiters: u32,
    pub last_owner: Option<ThreadIdentity>,
    pub last_waiter: Option<ThreadIdentity>,
    pub try_lock_guard: u32,
}

impl RecordSnapshot {
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.lock_index > UNLOCKED
    }

    /// Number of outstanding acquisitions (0 when free).
    #[must_use]
    pub fn depth(&self) -> u32 {
        u32::try_from(self.lock_index - UNLOCKED).unwrap_or(0)
    }
}

/// What a handle currently resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexSnapshot {
    /// Lazy-init sentinel; no record has been built yet.
    Uninitialized,
    Constructed(RecordSnapshot),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A mutex handle.
///
/// `MutexHandle::new_static()` (or [`MutexHandle::INITIALIZER`]) is usable in
/// `static` items and builds its record on first use. [`MutexHandle::null`]
/// is the empty handle that [`MutexHandle::create`] constructs into.
pub struct MutexHandle {
    slot: SlotLatch<MutexSlot>,
}

impl MutexHandle {
    /// Lazy-init sentinel, the `PTHREAD_MUTEX_INITIALIZER` analogue.
    #[allow(clippy::declare_interior_mutable_const)]
    pub const INITIALIZER: Self = Self::new_static();

    #[must_use]
    pub const fn new_static() -> Self {
        Self {
            slot: SlotLatch::new(MutexSlot::AutoInit),
        }
    }

    /// Empty handle: every operation but `create` fails with `InvalidArgument`.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            slot: SlotLatch::new(MutexSlot::Empty),
        }
    }

    /// Allocate a handle and construct it with `attr`.
    pub fn new(attr: Option<&MutexAttr>) -> Result<Self, MutexError> {
        let handle = Self::null();
        handle.create(attr)?;
        Ok(handle)
    }

    /// Construct a fresh record in this handle, replacing whatever it held.
    ///
    /// Attributes configured for `Shared` are always refused with
    /// [`MutexError::NotSupported`]. On allocation failure the handle is left
    /// as the lazy-init sentinel.
    pub fn create(&self, attr: Option<&MutexAttr>) -> Result<(), MutexError> {
        if attr.is_some_and(|a| a.sharing() == SharingMode::Shared) {
            return Err(MutexError::NotSupported);
        }
        let _scope = DeferredCancelScope::enter();
        let mut slot = self.slot.acquire();
        match MutexRecord::boxed(attr) {
            Ok(record) => {
                *slot = MutexSlot::Constructed(record);
                Ok(())
            }
            Err(err) => {
                *slot = MutexSlot::AutoInit;
                Err(err)
            }
        }
    }

    /// Release the record and empty the handle. Fails with `Busy` while any
    /// thread owns the mutex. A never-used sentinel destroys trivially.
    pub fn destroy(&self) -> Result<(), MutexError> {
        let _scope = DeferredCancelScope::enter();
        let mut slot = self.slot.acquire();
        match &*slot {
            MutexSlot::Empty => Err(MutexError::InvalidArgument),
            MutexSlot::AutoInit => {
                *slot = MutexSlot::Empty;
                Ok(())
            }
            MutexSlot::Constructed(record) if record.owner.is_some() => Err(MutexError::Busy),
            MutexSlot::Constructed(_) => {
                *slot = MutexSlot::Empty;
                Ok(())
            }
        }
    }

    /// Blocking acquire.
    pub fn lock(&self) -> Result<(), MutexError> {
        let scope = DeferredCancelScope::enter();
        let me = current_thread();
        let mut slot = self.slot.acquire();
        slot.materialize()?;

        let mut state = LockState::Attempting;
        loop {
            state = match state {
                LockState::Acquired => return Ok(()),
                LockState::Failed(err) => return Err(err),
                LockState::Waiting => {
                    drop(slot);
                    metrics::record(MutexBranch::WaitYield);
                    scope.yield_point();
                    slot = self.slot.acquire();
                    // Destroyed while we were parked.
                    slot.record_mut()?.leave_wait();
                    LockState::Attempting
                }
                step => slot.record_mut()?.step(step, me),
            };
        }
    }

    /// Release one acquisition held by the calling thread.
    pub fn unlock(&self) -> Result<(), MutexError> {
        let _scope = DeferredCancelScope::enter();
        let me = current_thread();
        let mut slot = self.slot.acquire();
        slot.record_mut()?.release(me)
    }

    /// Single-pass acquire. Never recurses: any held mutex is `Busy`, as is a
    /// slot momentarily latched by another operation.
    pub fn try_lock(&self) -> Result<(), MutexError> {
        let _scope = DeferredCancelScope::enter();
        let me = current_thread();
        let Some(mut slot) = self.slot.try_acquire() else {
            return Err(MutexError::Busy);
        };
        slot.materialize()?.try_take(me)
    }

    /// Read the handle's state under slot access.
    pub fn snapshot(&self) -> Result<MutexSnapshot, MutexError> {
        let _scope = DeferredCancelScope::enter();
        let slot = self.slot.acquire();
        match &*slot {
            MutexSlot::Empty => Err(MutexError::InvalidArgument),
            MutexSlot::AutoInit => Ok(MutexSnapshot::Uninitialized),
            MutexSlot::Constructed(record) => Ok(MutexSnapshot::Constructed(record.snapshot())),
        }
    }

    /// Returns true if the calling thread currently owns the mutex.
    #[must_use]
    pub fn is_owned_by_current(&self) -> bool {
        match self.snapshot() {
            Ok(MutexSnapshot::Constructed(record)) => record.owner == Some(current_thread()),
            _ => false,
        }
    }

    /// Lock and return a guard that unlocks on drop.
    pub fn guard(&self) -> Result<MutexGuard<'_>, MutexError> {
        self.lock()?;
        Ok(MutexGuard { mutex: self })
    }

    /// Try-lock and return a guard that unlocks on drop.
    pub fn try_guard(&self) -> Result<MutexGuard<'_>, MutexError> {
        self.try_lock()?;
        Ok(MutexGuard { mutex: self })
    }
}

impl Default for MutexHandle {
    fn default() -> Self {
        Self::new_static()
    }
}

impl fmt::Debug for MutexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexHandle")
            .field("slot", &self.slot)
            .finish()
    }
}

/// Scoped acquisition of a [`MutexHandle`].
#[must_use = "the mutex is unlocked as soon as the guard is dropped"]
#[derive(Debug)]
pub struct MutexGuard<'a> {
    mutex: &'a MutexHandle,
}

impl MutexGuard<'_> {
    #[must_use]
    pub fn mutex(&self) -> &MutexHandle {
        self.mutex
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        let released = self.mutex.unlock();
        debug_assert!(
            released.is_ok() || std::thread::panicking(),
            "mutex guard failed to release: {released:?}"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
