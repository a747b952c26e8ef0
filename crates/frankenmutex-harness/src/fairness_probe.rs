//! Fairness probe.
//!
//! Runs several threads that repeatedly lock and unlock one mutex for a fixed
//! wall-clock window and reports how evenly acquisitions were spread, together
//! with the branch-counter movement over the run (fairness deferrals, wait-loop
//! yields, slot contention).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use frankenmutex_core::pthread::{MutexAttr, MutexHandle, MutexType};
use frankenmutex_membrane::metrics::{MetricsSnapshot, global_metrics};
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

pub const FAIRNESS_BEAD: &str = "fm-fairness";

#[derive(Debug, Clone, Copy)]
pub struct FairnessConfig {
    pub kind: MutexType,
    pub threads: usize,
    pub duration: Duration,
    /// Busy iterations performed while holding the mutex.
    pub critical_spins: u32,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            kind: MutexType::Normal,
            threads: 4,
            duration: Duration::from_millis(200),
            critical_spins: 64,
        }
    }
}

/// Branch-counter movement across one probe run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub slot_contended: u64,
    pub slot_try_failed: u64,
    pub try_lock_guard_spins: u64,
    pub fairness_deferrals: u64,
    pub stale_waiter_resets: u64,
    pub wait_yields: u64,
    pub deadlocks_reported: u64,
    pub lazy_inits: u64,
}

impl CounterDelta {
    /// Difference between two snapshots. Counters reset in between read as 0.
    #[must_use]
    pub fn between(before: &MetricsSnapshot, after: &MetricsSnapshot) -> Self {
        Self {
            slot_contended: after.slot_contended.saturating_sub(before.slot_contended),
            slot_try_failed: after.slot_try_failed.saturating_sub(before.slot_try_failed),
            try_lock_guard_spins: after
                .try_lock_guard_spins
                .saturating_sub(before.try_lock_guard_spins),
            fairness_deferrals: after
                .fairness_deferrals
                .saturating_sub(before.fairness_deferrals),
            stale_waiter_resets: after
                .stale_waiter_resets
                .saturating_sub(before.stale_waiter_resets),
            wait_yields: after.wait_yields.saturating_sub(before.wait_yields),
            deadlocks_reported: after
                .deadlocks_reported
                .saturating_sub(before.deadlocks_reported),
            lazy_inits: after.lazy_inits.saturating_sub(before.lazy_inits),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairnessReport {
    pub bead: String,
    pub mutex_kind: String,
    pub threads: usize,
    pub duration_ms: u64,
    pub acquisitions: Vec<u64>,
    pub total: u64,
    pub min: u64,
    pub max: u64,
    /// `min / max`; 1.0 is perfectly even, 0.0 means some thread starved.
    pub evenness: f64,
    pub counters: CounterDelta,
}

impl FairnessReport {
    /// True when no thread was completely starved.
    #[must_use]
    pub fn no_starvation(&self) -> bool {
        self.min > 0
    }
}

/// How long the coordinator waits for every worker to report in.
const START_TIMEOUT: Duration = Duration::from_secs(10);

fn spin(iterations: u32) {
    for _ in 0..iterations {
        std::hint::spin_loop();
    }
}

/// Wait until `expected` workers have checked in, or fail after `timeout`.
fn wait_for_start(
    ready: &AtomicUsize,
    expected: usize,
    timeout: Duration,
) -> Result<(), HarnessError> {
    let deadline = Instant::now() + timeout;
    loop {
        let started = ready.load(Ordering::Acquire);
        if started >= expected {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(HarnessError::Probe(format!(
                "only {started} of {expected} workers started"
            )));
        }
        thread::yield_now();
    }
}

/// Release any parked workers with nothing to do and reap them.
fn abandon<T>(stop: &AtomicBool, go: &AtomicBool, workers: Vec<JoinHandle<T>>) {
    stop.store(true, Ordering::Release);
    go.store(true, Ordering::Release);
    for worker in workers {
        let _ = worker.join();
    }
}

/// Run the probe. Lock errors abort the worker that hit them and fail the run.
pub fn run_fairness_probe(config: FairnessConfig) -> Result<FairnessReport, HarnessError> {
    if config.threads == 0 {
        return Err(HarnessError::InvalidArgument(
            "fairness probe needs at least one thread".into(),
        ));
    }

    let mutex = Arc::new(MutexHandle::new(Some(&MutexAttr::with_kind(config.kind)))?);
    let stop = Arc::new(AtomicBool::new(false));
    let go = Arc::new(AtomicBool::new(false));
    let ready = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::with_capacity(config.threads);
    for index in 0..config.threads {
        let mutex = Arc::clone(&mutex);
        let worker_stop = Arc::clone(&stop);
        let worker_go = Arc::clone(&go);
        let ready = Arc::clone(&ready);
        let critical_spins = config.critical_spins;
        let spawned = thread::Builder::new()
            .name(format!("fairness-{index}"))
            .spawn(move || -> Result<u64, HarnessError> {
                ready.fetch_add(1, Ordering::AcqRel);
                while !worker_go.load(Ordering::Acquire) {
                    thread::yield_now();
                }
                let mut acquired = 0u64;
                while !worker_stop.load(Ordering::Relaxed) {
                    mutex.lock()?;
                    acquired += 1;
                    spin(critical_spins);
                    mutex.unlock()?;
                }
                Ok(acquired)
            });
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(err) => {
                abandon(&stop, &go, workers);
                return Err(HarnessError::Probe(format!("spawning worker {index}: {err}")));
            }
        }
    }

    if let Err(err) = wait_for_start(&ready, config.threads, START_TIMEOUT) {
        abandon(&stop, &go, workers);
        return Err(err);
    }

    let before = global_metrics().snapshot();
    go.store(true, Ordering::Release);
    let start = Instant::now();
    thread::sleep(config.duration);
    stop.store(true, Ordering::Relaxed);

    let mut acquisitions = Vec::with_capacity(config.threads);
    let mut first_error = None;
    for worker in workers {
        match worker.join() {
            Ok(Ok(count)) => acquisitions.push(count),
            Ok(Err(err)) => {
                acquisitions.push(0);
                first_error.get_or_insert(err);
            }
            Err(_) => {
                acquisitions.push(0);
                first_error.get_or_insert(HarnessError::Probe("worker panicked".into()));
            }
        }
    }
    let elapsed = start.elapsed();
    let after = global_metrics().snapshot();
    if let Some(err) = first_error {
        return Err(err);
    }

    let total = acquisitions.iter().sum();
    let min = acquisitions.iter().copied().min().unwrap_or(0);
    let max = acquisitions.iter().copied().max().unwrap_or(0);
    #[allow(clippy::cast_precision_loss)]
    let evenness = if max == 0 {
        0.0
    } else {
        min as f64 / max as f64
    };

    Ok(FairnessReport {
        bead: FAIRNESS_BEAD.to_string(),
        mutex_kind: config.kind.as_str().to_string(),
        threads: config.threads,
        duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        acquisitions,
        total,
        min,
        max,
        evenness,
        counters: CounterDelta::between(&before, &after),
    })
}
