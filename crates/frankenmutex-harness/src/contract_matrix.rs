//! Contract matrix runner.
//!
//! Replays every (mutex kind, state, operation) cell of the clean-room
//! transition model against a real [`MutexHandle`] and records expected vs
//! observed next state, errno, and blocking behavior.
//!
//! `LockedByOther` is staged with a holder thread. Blocking is detected by
//! timing: the holder lets go after `hold_for`, and a lock that took at least
//! `block_threshold` is counted as having waited.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use frankenmutex_core::pthread::{
    MutexAttr, MutexContractOp, MutexContractState, MutexHandle, MutexSnapshot, MutexType,
    errno_result, mutex_contract_transition,
};
use frankenmutex_membrane::config::safety_level;
use frankenmutex_membrane::current_thread;
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::structured_log::{ArtifactIndex, LogEmitter, LogEntry, LogLevel, Outcome, StreamKind};

pub const CONTRACT_BEAD: &str = "fm-contract";

pub const ALL_KINDS: [MutexType; 4] = [
    MutexType::Normal,
    MutexType::Recursive,
    MutexType::ErrorCheck,
    MutexType::Default,
];

/// Timing knobs for blocking detection.
#[derive(Debug, Clone, Copy)]
pub struct MatrixTiming {
    pub hold_for: Duration,
    pub block_threshold: Duration,
}

impl Default for MatrixTiming {
    fn default() -> Self {
        Self {
            hold_for: Duration::from_millis(100),
            block_threshold: Duration::from_millis(25),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Ok,
    Mismatch,
    /// Checked against the model only; the real call would never return.
    ModelOnly,
}

/// One replayed cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractCaseRow {
    pub case_id: String,
    pub mutex_kind: String,
    pub old_state: String,
    pub operation: String,
    pub expected_next: String,
    pub expected_errno: i32,
    pub expected_blocks: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_errno: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_blocks: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing_ns: Option<u64>,
    pub status: CaseStatus,
}

/// Per-kind aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindMatrixRow {
    pub mutex_kind: String,
    pub total: u64,
    pub passed: u64,
    pub mismatched: u64,
    pub model_only: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractMatrixSummary {
    pub total_cases: u64,
    pub passed: u64,
    pub mismatched: u64,
    pub model_only: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractMatrixReport {
    pub schema_version: String,
    pub bead: String,
    pub mode: String,
    pub summary: ContractMatrixSummary,
    pub kind_matrix: Vec<KindMatrixRow>,
    pub cases: Vec<ContractCaseRow>,
}

impl ContractMatrixReport {
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.summary.mismatched == 0
    }

    /// Human-readable one-liners for each mismatching cell.
    #[must_use]
    pub fn mismatches(&self) -> Vec<String> {
        self.cases
            .iter()
            .filter(|row| row.status == CaseStatus::Mismatch)
            .map(|row| {
                format!(
                    "{} expected(next={}, errno={}, blocks={}) got(next={}, errno={}, blocks={})",
                    row.case_id,
                    row.expected_next,
                    row.expected_errno,
                    row.expected_blocks,
                    row.observed_next.as_deref().unwrap_or("?"),
                    row.observed_errno.unwrap_or(-1),
                    row.observed_blocks.unwrap_or(false),
                )
            })
            .collect()
    }
}

/// A thread that owns the mutex until told to let go.
struct Holder {
    release: mpsc::Sender<()>,
    done: JoinHandle<()>,
}

impl Holder {
    fn spawn(mutex: Arc<MutexHandle>) -> Result<Self, HarnessError> {
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release, release_rx) = mpsc::channel::<()>();
        let done = thread::spawn(move || {
            let locked = mutex.lock();
            let held = locked.is_ok();
            let _ = locked_tx.send(locked);
            if held {
                let _ = release_rx.recv();
                // Init may have replaced the record underneath us.
                let _ = mutex.unlock();
            }
        });
        match locked_rx.recv() {
            Ok(Ok(())) => Ok(Self { release, done }),
            Ok(Err(err)) => {
                let _ = done.join();
                Err(err.into())
            }
            Err(_) => {
                let _ = done.join();
                Err(HarnessError::Probe("holder exited before locking".into()))
            }
        }
    }

    fn finish(self) {
        let _ = self.release.send(());
        let _ = self.done.join();
    }
}

fn stage(
    kind: MutexType,
    state: MutexContractState,
) -> Result<(Arc<MutexHandle>, Option<Holder>), HarnessError> {
    let mutex = Arc::new(match state {
        MutexContractState::Uninitialized => MutexHandle::null(),
        MutexContractState::StaticInitializer => MutexHandle::new_static(),
        _ => MutexHandle::new(Some(&MutexAttr::with_kind(kind)))?,
    });
    let holder = match state {
        MutexContractState::LockedBySelf => {
            mutex.lock()?;
            None
        }
        MutexContractState::LockedByOther => Some(Holder::spawn(Arc::clone(&mutex))?),
        MutexContractState::Destroyed => {
            mutex.destroy()?;
            None
        }
        _ => None,
    };
    Ok((mutex, holder))
}

/// Classify a mutex from the caller's point of view.
fn observe(mutex: &MutexHandle, before: MutexContractState) -> MutexContractState {
    match mutex.snapshot() {
        Err(_) if before == MutexContractState::Uninitialized => MutexContractState::Uninitialized,
        Err(_) => MutexContractState::Destroyed,
        Ok(MutexSnapshot::Uninitialized) => MutexContractState::StaticInitializer,
        Ok(MutexSnapshot::Constructed(r)) => match r.owner {
            None => MutexContractState::Unlocked,
            Some(owner) if owner == current_thread() => MutexContractState::LockedBySelf,
            Some(_) => MutexContractState::LockedByOther,
        },
    }
}

/// What a real call did.
#[derive(Debug, Clone, Copy)]
pub struct Observed {
    pub next: MutexContractState,
    pub errno: i32,
    pub blocks: bool,
    pub elapsed: Duration,
}

/// Whether a cell can be exercised at all. A normal mutex relocked by its
/// owner waits forever.
#[must_use]
pub fn is_model_only(kind: MutexType, state: MutexContractState, op: MutexContractOp) -> bool {
    kind == MutexType::Normal
        && state == MutexContractState::LockedBySelf
        && op == MutexContractOp::Lock
}

/// Stage `state`, apply `op`, and report what happened. The mutex is left
/// released by the calling thread afterwards.
pub fn run_cell(
    kind: MutexType,
    state: MutexContractState,
    op: MutexContractOp,
    timing: MatrixTiming,
) -> Result<Observed, HarnessError> {
    if is_model_only(kind, state, op) {
        return Err(HarnessError::InvalidArgument(format!(
            "{}:{}:{} never returns",
            kind.as_str(),
            state.as_str(),
            op.as_str()
        )));
    }

    let (mutex, mut holder) = stage(kind, state)?;
    let start = Instant::now();
    let result = match op {
        MutexContractOp::Init => mutex.create(Some(&MutexAttr::with_kind(kind))),
        MutexContractOp::Lock => match holder.take() {
            Some(h) => {
                let hold_for = timing.hold_for;
                let releaser = thread::spawn(move || {
                    thread::sleep(hold_for);
                    h.finish();
                });
                let result = mutex.lock();
                releaser
                    .join()
                    .map_err(|_| HarnessError::Probe("releaser panicked".into()))?;
                result
            }
            None => mutex.lock(),
        },
        MutexContractOp::TryLock => mutex.try_lock(),
        MutexContractOp::Unlock => mutex.unlock(),
        MutexContractOp::Destroy => mutex.destroy(),
    };
    let elapsed = start.elapsed();

    let next = if op == MutexContractOp::Destroy && result.is_ok() {
        MutexContractState::Destroyed
    } else {
        observe(&mutex, state)
    };

    while mutex.is_owned_by_current() {
        if mutex.unlock().is_err() {
            break;
        }
    }
    if let Some(h) = holder {
        h.finish();
    }

    Ok(Observed {
        next,
        errno: errno_result(result),
        blocks: elapsed >= timing.block_threshold,
        elapsed,
    })
}

fn evaluate(
    kind: MutexType,
    state: MutexContractState,
    op: MutexContractOp,
    timing: MatrixTiming,
) -> Result<ContractCaseRow, HarnessError> {
    let expected = mutex_contract_transition(kind.as_raw(), state, op);
    let mut row = ContractCaseRow {
        case_id: format!("{}:{}:{}", kind.as_str(), state.as_str(), op.as_str()),
        mutex_kind: kind.as_str().to_string(),
        old_state: state.as_str().to_string(),
        operation: op.as_str().to_string(),
        expected_next: expected.next.as_str().to_string(),
        expected_errno: expected.errno,
        expected_blocks: expected.blocks,
        observed_next: None,
        observed_errno: None,
        observed_blocks: None,
        timing_ns: None,
        status: CaseStatus::ModelOnly,
    };
    if is_model_only(kind, state, op) {
        return Ok(row);
    }

    let got = run_cell(kind, state, op, timing)?;
    // A blocking cell's `next` describes the mutex while blocked; by the
    // time the real call returns, the caller owns it.
    let next_ok = expected.blocks || got.next == expected.next;
    let ok = next_ok && got.errno == expected.errno && got.blocks == expected.blocks;
    row.observed_next = Some(got.next.as_str().to_string());
    row.observed_errno = Some(got.errno);
    row.observed_blocks = Some(got.blocks);
    row.timing_ns = Some(u64::try_from(got.elapsed.as_nanos()).unwrap_or(u64::MAX));
    row.status = if ok {
        CaseStatus::Ok
    } else {
        CaseStatus::Mismatch
    };
    Ok(row)
}

/// Replay every cell for `kinds`.
pub fn build_contract_matrix(
    kinds: &[MutexType],
    timing: MatrixTiming,
) -> Result<ContractMatrixReport, HarnessError> {
    let mut cases = Vec::with_capacity(kinds.len() * 30);
    for &kind in kinds {
        for state in MutexContractState::ALL {
            for op in MutexContractOp::ALL {
                cases.push(evaluate(kind, state, op, timing)?);
            }
        }
    }

    let mut buckets: BTreeMap<String, KindMatrixRow> = BTreeMap::new();
    for row in &cases {
        let bucket = buckets
            .entry(row.mutex_kind.clone())
            .or_insert_with(|| KindMatrixRow {
                mutex_kind: row.mutex_kind.clone(),
                total: 0,
                passed: 0,
                mismatched: 0,
                model_only: 0,
            });
        bucket.total += 1;
        match row.status {
            CaseStatus::Ok => bucket.passed += 1,
            CaseStatus::Mismatch => bucket.mismatched += 1,
            CaseStatus::ModelOnly => {
                bucket.passed += 1;
                bucket.model_only += 1;
            }
        }
    }

    let kind_matrix: Vec<KindMatrixRow> = buckets.into_values().collect();
    let summary = ContractMatrixSummary {
        total_cases: kind_matrix.iter().map(|r| r.total).sum(),
        passed: kind_matrix.iter().map(|r| r.passed).sum(),
        mismatched: kind_matrix.iter().map(|r| r.mismatched).sum(),
        model_only: kind_matrix.iter().map(|r| r.model_only).sum(),
    };

    Ok(ContractMatrixReport {
        schema_version: "v1".to_string(),
        bead: CONTRACT_BEAD.to_string(),
        mode: safety_level().as_str().to_string(),
        summary,
        kind_matrix,
        cases,
    })
}

/// Write `<stem>.log.jsonl`, `<stem>.report.json`, and
/// `<stem>.artifacts.json` under `out_dir`. Paths in the index are relative
/// to `root`.
pub fn write_matrix_artifacts(
    report: &ContractMatrixReport,
    root: &Path,
    out_dir: &Path,
    stem: &str,
    run_id: &str,
) -> Result<ArtifactIndex, HarnessError> {
    std::fs::create_dir_all(out_dir).map_err(|source| HarnessError::io(out_dir, source))?;
    let log_path = out_dir.join(format!("{stem}.log.jsonl"));
    let report_path = out_dir.join(format!("{stem}.report.json"));
    let index_path = out_dir.join(format!("{stem}.artifacts.json"));
    let report_ref = report_path
        .strip_prefix(root)
        .unwrap_or(&report_path)
        .to_string_lossy()
        .into_owned();

    let mut emitter = LogEmitter::to_file(&log_path, &report.bead, run_id)?;
    emitter.emit_entry(
        LogEntry::new("", LogLevel::Info, "contract_matrix_start")
            .with_stream(StreamKind::Conformance)
            .with_mode(report.mode.clone()),
    )?;
    for row in &report.cases {
        let (level, outcome) = match row.status {
            CaseStatus::Ok => (LogLevel::Info, Outcome::Pass),
            CaseStatus::Mismatch => (LogLevel::Error, Outcome::Fail),
            CaseStatus::ModelOnly => (LogLevel::Info, Outcome::ModelOnly),
        };
        let new_state = row.observed_next.as_deref().unwrap_or(&row.expected_next);
        let mut entry = LogEntry::new("", level, "contract_case")
            .with_stream(StreamKind::Conformance)
            .with_mode(report.mode.clone())
            .with_mutex_kind(row.mutex_kind.clone())
            .with_symbol(row.operation.clone())
            .with_transition(row.old_state.clone(), new_state)
            .with_outcome(outcome)
            .with_errno(row.observed_errno.unwrap_or(row.expected_errno))
            .with_details(serde_json::json!({
                "case_id": row.case_id,
                "expected_next": row.expected_next,
                "expected_errno": row.expected_errno,
                "expected_blocks": row.expected_blocks,
                "observed_blocks": row.observed_blocks,
            }));
        if let Some(ns) = row.timing_ns {
            entry = entry.with_latency_ns(ns);
        }
        if row.status == CaseStatus::Mismatch {
            entry = entry.with_artifacts(vec![report_ref.clone()]);
        }
        emitter.emit_entry(entry)?;
    }
    emitter.emit_entry(
        LogEntry::new("", LogLevel::Info, "contract_matrix_end")
            .with_stream(StreamKind::Conformance)
            .with_mode(report.mode.clone())
            .with_details(serde_json::to_value(&report.summary)?),
    )?;
    emitter.flush()?;
    drop(emitter);

    let body = serde_json::to_string_pretty(report)?;
    std::fs::write(&report_path, body).map_err(|source| HarnessError::io(&report_path, source))?;

    let mut index = ArtifactIndex::new(run_id, &report.bead);
    index.add_file(root, &log_path, "log")?;
    index.add_file(root, &report_path, "report")?;
    let index_body = index.to_json()?;
    std::fs::write(&index_path, index_body).map_err(|source| HarnessError::io(&index_path, source))?;
    Ok(index)
}
