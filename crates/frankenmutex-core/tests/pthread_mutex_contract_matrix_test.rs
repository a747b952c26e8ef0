use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use frankenmutex_core::pthread::{
    MutexAttr, MutexContractOp, MutexContractState, MutexHandle, MutexSnapshot, MutexType,
    errno_result, mutex_contract_transition,
};
use frankenmutex_membrane::current_thread;

/// How long a holder keeps the mutex once a blocking lock is in flight.
const HOLD_FOR: Duration = Duration::from_millis(100);
/// A lock that returns sooner than this did not wait for the holder.
const BLOCK_THRESHOLD: Duration = Duration::from_millis(25);

fn workspace_root() -> PathBuf {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest.parent().unwrap().parent().unwrap().to_path_buf()
}

/// A thread that owns the mutex until told to let go.
struct Holder {
    release: mpsc::Sender<()>,
    done: JoinHandle<()>,
}

impl Holder {
    fn spawn(mutex: Arc<MutexHandle>) -> Self {
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release, release_rx) = mpsc::channel::<()>();
        let done = thread::spawn(move || {
            mutex.lock().unwrap();
            locked_tx.send(()).unwrap();
            let _ = release_rx.recv();
            // Init may have replaced the record underneath us.
            let _ = mutex.unlock();
        });
        locked_rx.recv().unwrap();
        Self { release, done }
    }

    fn finish(self) {
        let _ = self.release.send(());
        self.done.join().unwrap();
    }
}

fn setup(kind: MutexType, state: MutexContractState) -> (Arc<MutexHandle>, Option<Holder>) {
    let attr = MutexAttr::with_kind(kind);
    let mutex = Arc::new(match state {
        MutexContractState::Uninitialized => MutexHandle::null(),
        MutexContractState::StaticInitializer => MutexHandle::new_static(),
        _ => MutexHandle::new(Some(&attr)).unwrap(),
    });
    let mut holder = None;
    match state {
        MutexContractState::LockedBySelf => mutex.lock().unwrap(),
        MutexContractState::LockedByOther => holder = Some(Holder::spawn(Arc::clone(&mutex))),
        MutexContractState::Destroyed => mutex.destroy().unwrap(),
        _ => {}
    }
    (mutex, holder)
}

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

struct Observed {
    next: MutexContractState,
    errno: i32,
    blocks: bool,
    timing_ns: u128,
}

/// Apply `op` to a mutex in `state` and report what actually happened.
/// `None` for the one cell that never returns (NORMAL self-relock).
fn run_cell(kind: MutexType, state: MutexContractState, op: MutexContractOp) -> Option<Observed> {
    if kind == MutexType::Normal
        && state == MutexContractState::LockedBySelf
        && op == MutexContractOp::Lock
    {
        return None;
    }

    let (mutex, holder) = setup(kind, state);
    let mut holder = holder;
    let t0 = Instant::now();
    let result = match op {
        MutexContractOp::Init => mutex.create(Some(&MutexAttr::with_kind(kind))),
        MutexContractOp::Lock => {
            if let Some(h) = holder.take() {
                let releaser = thread::spawn(move || {
                    thread::sleep(HOLD_FOR);
                    h.finish();
                });
                let result = mutex.lock();
                releaser.join().unwrap();
                result
            } else {
                mutex.lock()
            }
        }
        MutexContractOp::TryLock => mutex.try_lock(),
        MutexContractOp::Unlock => mutex.unlock(),
        MutexContractOp::Destroy => mutex.destroy(),
    };
    let elapsed = t0.elapsed();

    let next = if op == MutexContractOp::Destroy && result.is_ok() {
        MutexContractState::Destroyed
    } else {
        observe(&mutex, state)
    };

    while mutex.is_owned_by_current() {
        mutex.unlock().unwrap();
    }
    if let Some(h) = holder {
        h.finish();
    }

    Some(Observed {
        next,
        errno: errno_result(result),
        blocks: elapsed >= BLOCK_THRESHOLD,
        timing_ns: elapsed.as_nanos(),
    })
}

#[test]
fn contract_matrix_matches_implementation_and_emits_structured_logs() {
    let root = workspace_root();
    let out_dir = root.join("target/conformance");
    fs::create_dir_all(&out_dir).expect("create target/conformance");

    let log_path = out_dir.join("pthread_mutex_contract_matrix.log.jsonl");
    let report_path = out_dir.join("pthread_mutex_contract_matrix.report.json");

    let mut log_lines = Vec::new();
    let mut mismatches = Vec::new();
    let mut total = 0usize;
    let mut passed = 0usize;
    let mut model_only = 0usize;

    for kind in [
        MutexType::Normal,
        MutexType::Recursive,
        MutexType::ErrorCheck,
        MutexType::Default,
    ] {
        for state in MutexContractState::ALL {
            for op in MutexContractOp::ALL {
                total += 1;
                let expected = mutex_contract_transition(kind.as_raw(), state, op);
                let trace_id = format!(
                    "pthread-mutex-contract:{}:{}:{}",
                    kind.as_str(),
                    state.as_str(),
                    op.as_str()
                );

                let Some(got) = run_cell(kind, state, op) else {
                    model_only += 1;
                    passed += 1;
                    log_lines.push(format!(
                        "{{\"trace_id\":\"{}\",\"operation\":\"{}\",\"old_state\":\"{}\",\"new_state\":\"{}\",\"errno\":{},\"blocks\":{},\"status\":\"model_only\"}}",
                        trace_id,
                        op.as_str(),
                        state.as_str(),
                        expected.next.as_str(),
                        expected.errno,
                        expected.blocks
                    ));
                    continue;
                };

                // A blocking cell's `next` describes the mutex while blocked;
                // by the time the real call returns, the caller owns it.
                let next_ok = expected.blocks || got.next == expected.next;
                let ok = next_ok && got.errno == expected.errno && got.blocks == expected.blocks;
                if ok {
                    passed += 1;
                } else {
                    mismatches.push(format!(
                        "{}:{}:{} expected(next={}, errno={}, blocks={}) got(next={}, errno={}, blocks={})",
                        kind.as_str(),
                        state.as_str(),
                        op.as_str(),
                        expected.next.as_str(),
                        expected.errno,
                        expected.blocks,
                        got.next.as_str(),
                        got.errno,
                        got.blocks
                    ));
                }

                let status = if ok { "ok" } else { "mismatch" };
                log_lines.push(format!(
                    "{{\"trace_id\":\"{}\",\"operation\":\"{}\",\"old_state\":\"{}\",\"new_state\":\"{}\",\"errno\":{},\"blocks\":{},\"timing_ns\":{},\"status\":\"{}\"}}",
                    trace_id,
                    op.as_str(),
                    state.as_str(),
                    got.next.as_str(),
                    got.errno,
                    got.blocks,
                    got.timing_ns,
                    status
                ));
            }
        }
    }

    fs::write(&log_path, format!("{}\n", log_lines.join("\n"))).expect("write jsonl log");

    let report = format!(
        concat!(
            "{{\n",
            "  \"ok\": {},\n",
            "  \"total_cases\": {},\n",
            "  \"passed_cases\": {},\n",
            "  \"model_only_cases\": {},\n",
            "  \"failed_cases\": {},\n",
            "  \"log_jsonl\": \"{}\",\n",
            "  \"mismatches\": [\n{}\n  ]\n",
            "}}\n"
        ),
        mismatches.is_empty(),
        total,
        passed,
        model_only,
        total - passed,
        log_path
            .strip_prefix(&root)
            .unwrap_or(&log_path)
            .to_string_lossy(),
        mismatches
            .iter()
            .map(|m| format!("    \"{}\"", m.replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(",\n")
    );
    fs::write(&report_path, report).expect("write report json");

    assert_eq!(total, 4 * 6 * 5);
    assert_eq!(model_only, 1);
    assert!(
        mismatches.is_empty(),
        "contract matrix mismatch(es): {:?}",
        mismatches
    );
}
