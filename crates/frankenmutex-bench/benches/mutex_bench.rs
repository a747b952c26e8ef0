//! Mutex hot-path benchmarks.
//!
//! Uncontended lock/unlock per mutex kind, try-lock, recursive depth, the
//! abi entry points, and contended throughput across threads.

use std::cell::RefCell;
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use frankenmutex_abi::pthread_abi::{
    FM_PTHREAD_MUTEX_INITIALIZER, fm_pthread_mutex_lock, fm_pthread_mutex_trylock,
    fm_pthread_mutex_unlock,
};
use frankenmutex_core::{MutexAttr, MutexHandle, MutexType};
use frankenmutex_membrane::config::safety_level;

#[derive(Default)]
struct BenchStats {
    samples_ns_per_op: Vec<f64>,
    total_iters: u64,
    total_ns: u128,
}

impl BenchStats {
    fn record(&mut self, iters: u64, dur: Duration) {
        let ns = dur.as_nanos();
        self.total_iters = self.total_iters.saturating_add(iters);
        self.total_ns = self.total_ns.saturating_add(ns);
        self.samples_ns_per_op.push(ns as f64 / iters.max(1) as f64);
    }

    fn report(&self, mode_label: &str, bench_label: &str) {
        let mut samples = self.samples_ns_per_op.clone();
        if samples.is_empty() {
            return;
        }
        samples.sort_by(f64::total_cmp);
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let throughput_ops_s = if self.total_ns == 0 {
            0.0
        } else {
            self.total_iters as f64 / (self.total_ns as f64 / 1e9)
        };
        println!(
            "MUTEX_BENCH mode={} bench={} samples={} p50_ns_op={:.3} p95_ns_op={:.3} mean_ns_op={:.3} throughput_ops_s={:.3}",
            mode_label,
            bench_label,
            samples.len(),
            percentile_sorted(&samples, 0.50),
            percentile_sorted(&samples, 0.95),
            mean,
            throughput_ops_s
        );
    }
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn maybe_pin_thread() {
    if std::env::var("FRANKENMUTEX_BENCH_PIN").ok().as_deref() != Some("1") {
        return;
    }

    #[cfg(target_os = "linux")]
    unsafe {
        // SAFETY: best-effort pinning of the calling thread; failure is reported, not fatal.
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(0, &mut set);
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            eprintln!("MUTEX_BENCH_META pinning_failed errno={errno}");
        } else {
            println!("MUTEX_BENCH_META pinned_to_cpu=0");
        }
    }
}

fn timed(
    stats: &RefCell<BenchStats>,
    iters: u64,
    mut body: impl FnMut(),
) -> Duration {
    let start = Instant::now();
    for _ in 0..iters {
        body();
    }
    let dur = start.elapsed().max(Duration::from_nanos(1));
    stats.borrow_mut().record(iters, dur);
    dur
}

fn mutex_of(kind: MutexType) -> MutexHandle {
    MutexHandle::new(Some(&MutexAttr::with_kind(kind))).expect("mutex creation")
}

fn bench_uncontended(c: &mut Criterion) {
    maybe_pin_thread();
    let mode_label = safety_level().as_str();
    let mut group = c.benchmark_group("mutex_uncontended");
    group.throughput(Throughput::Elements(1));

    for kind in [
        MutexType::Normal,
        MutexType::Recursive,
        MutexType::ErrorCheck,
        MutexType::Default,
    ] {
        let mutex = mutex_of(kind);
        let stats = RefCell::new(BenchStats::default());
        group.bench_function(BenchmarkId::new("lock_unlock", kind.as_str()), |b| {
            b.iter_custom(|iters| {
                timed(&stats, iters, || {
                    black_box(mutex.lock()).expect("lock");
                    black_box(mutex.unlock()).expect("unlock");
                })
            });
        });
        stats
            .borrow()
            .report(mode_label, &format!("lock_unlock/{}", kind.as_str()));
    }

    {
        let mutex = mutex_of(MutexType::Normal);
        let stats = RefCell::new(BenchStats::default());
        group.bench_function("trylock_unlock", |b| {
            b.iter_custom(|iters| {
                timed(&stats, iters, || {
                    black_box(mutex.try_lock()).expect("trylock");
                    black_box(mutex.unlock()).expect("unlock");
                })
            });
        });
        stats.borrow().report(mode_label, "trylock_unlock");
    }

    {
        let mutex = mutex_of(MutexType::Normal);
        mutex.lock().expect("lock");
        let stats = RefCell::new(BenchStats::default());
        group.bench_function("trylock_busy", |b| {
            b.iter_custom(|iters| {
                timed(&stats, iters, || {
                    let _ = black_box(mutex.try_lock());
                })
            });
        });
        stats.borrow().report(mode_label, "trylock_busy");
        mutex.unlock().expect("unlock");
    }

    {
        let stats = RefCell::new(BenchStats::default());
        group.bench_function("guard", |b| {
            let mutex = mutex_of(MutexType::Default);
            b.iter_custom(|iters| {
                timed(&stats, iters, || {
                    black_box(mutex.guard().expect("guard"));
                })
            });
        });
        stats.borrow().report(mode_label, "guard");
    }

    group.finish();
}

fn bench_recursive_depth(c: &mut Criterion) {
    let mode_label = safety_level().as_str();
    let mut group = c.benchmark_group("mutex_recursive_depth");

    for depth in [1u64, 8, 64] {
        let mutex = mutex_of(MutexType::Recursive);
        let stats = RefCell::new(BenchStats::default());
        group.throughput(Throughput::Elements(depth));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter_custom(|iters| {
                timed(&stats, iters, || {
                    for _ in 0..depth {
                        mutex.lock().expect("lock");
                    }
                    for _ in 0..depth {
                        mutex.unlock().expect("unlock");
                    }
                })
            });
        });
        stats
            .borrow()
            .report(mode_label, &format!("recursive_depth/{depth}"));
    }

    group.finish();
}

fn bench_abi(c: &mut Criterion) {
    let mode_label = safety_level().as_str();
    let mut group = c.benchmark_group("mutex_abi");
    group.throughput(Throughput::Elements(1));

    let mut mutex = FM_PTHREAD_MUTEX_INITIALIZER;
    let ptr = &raw mut mutex;
    let stats = RefCell::new(BenchStats::default());
    group.bench_function("fm_lock_unlock", |b| {
        b.iter_custom(|iters| {
            timed(&stats, iters, || unsafe {
                // SAFETY: `ptr` points at a live, initialized FmMutex.
                black_box(fm_pthread_mutex_lock(ptr));
                black_box(fm_pthread_mutex_unlock(ptr));
            })
        });
    });
    stats.borrow().report(mode_label, "fm_lock_unlock");

    let stats = RefCell::new(BenchStats::default());
    group.bench_function("fm_trylock_unlock", |b| {
        b.iter_custom(|iters| {
            timed(&stats, iters, || unsafe {
                // SAFETY: as above.
                black_box(fm_pthread_mutex_trylock(ptr));
                black_box(fm_pthread_mutex_unlock(ptr));
            })
        });
    });
    stats.borrow().report(mode_label, "fm_trylock_unlock");

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mode_label = safety_level().as_str();
    let mut group = c.benchmark_group("mutex_contended");
    group.sample_size(20);

    for threads in [2usize, 4] {
        let stats = RefCell::new(BenchStats::default());
        group.throughput(Throughput::Elements(threads as u64));
        group.bench_with_input(
            BenchmarkId::new("lock_unlock", threads),
            &threads,
            |b, &threads| {
                b.iter_custom(|iters| {
                    let mutex = Arc::new(mutex_of(MutexType::Normal));
                    let barrier = Arc::new(Barrier::new(threads + 1));
                    let workers: Vec<_> = (0..threads)
                        .map(|_| {
                            let mutex = Arc::clone(&mutex);
                            let barrier = Arc::clone(&barrier);
                            std::thread::spawn(move || {
                                barrier.wait();
                                for _ in 0..iters {
                                    mutex.lock().expect("lock");
                                    black_box(());
                                    mutex.unlock().expect("unlock");
                                }
                            })
                        })
                        .collect();
                    barrier.wait();
                    let start = Instant::now();
                    for worker in workers {
                        worker.join().expect("worker");
                    }
                    let dur = start.elapsed().max(Duration::from_nanos(1));
                    stats
                        .borrow_mut()
                        .record(iters.saturating_mul(threads as u64), dur);
                    dur
                });
            },
        );
        stats
            .borrow()
            .report(mode_label, &format!("contended/{threads}"));
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_uncontended,
    bench_recursive_depth,
    bench_abi,
    bench_contended
);
criterion_main!(benches);
