//! Cross-thread behavior of the membrane primitives the mutex core relies on:
//! the slot latch under contention, cancel requests delivered from another
//! thread, and allocation failure injection staying thread-local.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;

use frankenmutex_membrane::alloc::{inject_alloc_failures, pending_alloc_failures, try_box};
use frankenmutex_membrane::cancel::{
    CancelState, CancelType, DeferredCancelScope, cancel_handle, is_canceled, request_cancel,
    set_cancel_state, set_cancel_type, test_cancellation,
};
use frankenmutex_membrane::{SlotLatch, current_thread};

#[test]
fn slot_latch_serializes_read_modify_write() {
    const THREADS: usize = 4;
    const ITERS: u64 = 2_000;

    let latch = Arc::new(SlotLatch::new(0u64));
    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let latch = Arc::clone(&latch);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ITERS {
                    let mut slot = latch.acquire();
                    let seen = *slot;
                    thread::yield_now();
                    *slot = seen + 1;
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(*latch.acquire(), THREADS as u64 * ITERS);
    assert!(!latch.is_held());
}

#[test]
fn try_acquire_fails_only_while_another_thread_holds_the_latch() {
    let latch = Arc::new(SlotLatch::new(String::from("record")));
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let holder = {
        let latch = Arc::clone(&latch);
        thread::spawn(move || {
            let mut slot = latch.acquire();
            slot.push_str("+held");
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
    };
    held_rx.recv().unwrap();
    assert!(latch.is_held());
    assert!(latch.try_acquire().is_none());

    release_tx.send(()).unwrap();
    holder.join().unwrap();
    let slot = latch.try_acquire().expect("latch free after holder exits");
    assert_eq!(slot.as_str(), "record+held");
}

#[test]
fn request_by_identity_reaches_an_asynchronous_thread() {
    let (id_tx, id_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let victim = thread::spawn(move || {
        let _ = cancel_handle();
        id_tx.send(current_thread()).unwrap();
        set_cancel_type(CancelType::Asynchronous);
        go_rx.recv().unwrap();
        loop {
            test_cancellation();
            thread::yield_now();
        }
    });

    let id = id_rx.recv().unwrap();
    assert!(request_cancel(id));
    go_tx.send(()).unwrap();
    let payload = victim.join().expect_err("victim must unwind");
    assert!(is_canceled(payload.as_ref()));
}

#[test]
fn disabled_state_holds_requests_until_reenabled() {
    let observed_pending = Arc::new(AtomicBool::new(false));
    let observed = Arc::clone(&observed_pending);
    let result = thread::spawn(move || {
        let handle = cancel_handle();
        set_cancel_type(CancelType::Asynchronous);
        set_cancel_state(CancelState::Disabled);
        handle.request();
        test_cancellation();
        observed.store(handle.is_pending(), Ordering::Release);
        set_cancel_state(CancelState::Enabled);
        test_cancellation();
    })
    .join();

    assert!(observed_pending.load(Ordering::Acquire));
    assert!(is_canceled(result.unwrap_err().as_ref()));
}

#[test]
fn deferred_scope_delivers_on_exit_not_inside() {
    let entered_body = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&entered_body);
    let result = thread::spawn(move || {
        let handle = cancel_handle();
        set_cancel_type(CancelType::Asynchronous);
        let scope = DeferredCancelScope::enter();
        handle.request();
        test_cancellation();
        flag.store(true, Ordering::Release);
        drop(scope);
    })
    .join();

    assert!(entered_body.load(Ordering::Acquire));
    assert!(is_canceled(result.unwrap_err().as_ref()));
}

#[test]
fn unknown_thread_identity_is_rejected() {
    let exited = thread::spawn(|| {
        let _ = cancel_handle();
        current_thread()
    })
    .join()
    .unwrap();
    assert!(!request_cancel(exited));
}

#[test]
fn failure_injection_is_per_thread() {
    inject_alloc_failures(2);
    let other = thread::spawn(|| {
        assert_eq!(pending_alloc_failures(), 0);
        try_box(7u32).is_ok()
    })
    .join()
    .unwrap();
    assert!(other);

    assert!(try_box(1u8).is_err());
    assert!(try_box(2u8).is_err());
    assert_eq!(*try_box(3u8).unwrap(), 3);
    assert_eq!(pending_alloc_failures(), 0);
}
