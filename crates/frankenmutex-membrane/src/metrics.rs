//! Atomic counters for mutex observability.
//!
//! All counters use relaxed ordering. They are advisory and diagnostic,
//! not synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

/// Branch of the locking state machine being counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutexBranch {
    /// Blocking slot-latch acquisition found the latch held.
    SlotContended,
    /// Non-blocking slot-latch acquisition failed.
    SlotTryFailed,
    /// A locker spun while a try-lock was mid-evaluation.
    TryLockGuardSpin,
    /// A previous owner deferred to a parked waiter.
    FairnessDeferral,
    /// A stale waiter count was reset by its only recorded waiter.
    StaleWaiterReset,
    /// One trip through the wait loop (slot released, yielded, re-acquired).
    WaitYield,
    /// An error-checking mutex refused a self-relock.
    DeadlockReported,
    /// A sentinel handle was materialized into a record.
    LazyInit,
}

/// Global mutex operation counters.
pub struct MutexMetrics {
    pub slot_contended: AtomicU64,
    pub slot_try_failed: AtomicU64,
    pub try_lock_guard_spins: AtomicU64,
    pub fairness_deferrals: AtomicU64,
    pub stale_waiter_resets: AtomicU64,
    pub wait_yields: AtomicU64,
    pub deadlocks_reported: AtomicU64,
    pub lazy_inits: AtomicU64,
}

impl MutexMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot_contended: AtomicU64::new(0),
            slot_try_failed: AtomicU64::new(0),
            try_lock_guard_spins: AtomicU64::new(0),
            fairness_deferrals: AtomicU64::new(0),
            stale_waiter_resets: AtomicU64::new(0),
            wait_yields: AtomicU64::new(0),
            deadlocks_reported: AtomicU64::new(0),
            lazy_inits: AtomicU64::new(0),
        }
    }

    fn counter(&self, branch: MutexBranch) -> &AtomicU64 {
        match branch {
            MutexBranch::SlotContended => &self.slot_contended,
            MutexBranch::SlotTryFailed => &self.slot_try_failed,
            MutexBranch::TryLockGuardSpin => &self.try_lock_guard_spins,
            MutexBranch::FairnessDeferral => &self.fairness_deferrals,
            MutexBranch::StaleWaiterReset => &self.stale_waiter_resets,
            MutexBranch::WaitYield => &self.wait_yields,
            MutexBranch::DeadlockReported => &self.deadlocks_reported,
            MutexBranch::LazyInit => &self.lazy_inits,
        }
    }

    /// Increment the counter for `branch` by 1.
    pub fn record(&self, branch: MutexBranch) {
        self.counter(branch).fetch_add(1, Ordering::Relaxed);
    }

    /// Read the counter for `branch`.
    #[must_use]
    pub fn get(&self, branch: MutexBranch) -> u64 {
        self.counter(branch).load(Ordering::Relaxed)
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.slot_contended,
            &self.slot_try_failed,
            &self.try_lock_guard_spins,
            &self.fairness_deferrals,
            &self.stale_waiter_resets,
            &self.wait_yields,
            &self.deadlocks_reported,
            &self.lazy_inits,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            slot_contended: self.get(MutexBranch::SlotContended),
            slot_try_failed: self.get(MutexBranch::SlotTryFailed),
            try_lock_guard_spins: self.get(MutexBranch::TryLockGuardSpin),
            fairness_deferrals: self.get(MutexBranch::FairnessDeferral),
            stale_waiter_resets: self.get(MutexBranch::StaleWaiterReset),
            wait_yields: self.get(MutexBranch::WaitYield),
            deadlocks_reported: self.get(MutexBranch::DeadlockReported),
            lazy_inits: self.get(MutexBranch::LazyInit),
        }
    }
}

impl Default for MutexMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all mutex counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub slot_contended: u64,
    pub slot_try_failed: u64,
    pub try_lock_guard_spins: u64,
    pub fairness_deferrals: u64,
    pub stale_waiter_resets: u64,
    pub wait_yields: u64,
    pub deadlocks_reported: u64,
    pub lazy_inits: u64,
}

static GLOBAL_METRICS: MutexMetrics = MutexMetrics::new();

/// Access the global metrics singleton.
#[must_use]
pub fn global_metrics() -> &'static MutexMetrics {
    &GLOBAL_METRICS
}

/// Shorthand for `global_metrics().record(branch)`.
#[inline]
pub fn record(branch: MutexBranch) {
    GLOBAL_METRICS.record(branch);
}
