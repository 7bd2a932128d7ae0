use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::Mutex;
use std::thread;

use vise::{PointerLock, SpinLock};

const THREADS: usize = 4;
const OPS_PER_THREAD: usize = 10_000;

struct UnsyncCounter(Cell<u64>);
unsafe impl Sync for UnsyncCounter {}

fn bench_counter(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_counter");

    group.bench_function("std_mutex", |b| {
        b.iter(|| {
            let counter = Mutex::new(0u64);
            thread::scope(|s| {
                for _ in 0..THREADS {
                    s.spawn(|| {
                        for _ in 0..OPS_PER_THREAD {
                            *counter.lock().unwrap() += 1;
                        }
                    });
                }
            });
            black_box(counter.into_inner().unwrap())
        })
    });

    group.bench_function("spin_lock", |b| {
        b.iter(|| {
            let lock = SpinLock::new();
            let counter = UnsyncCounter(Cell::new(0));
            thread::scope(|s| {
                for _ in 0..THREADS {
                    s.spawn(|| {
                        for _ in 0..OPS_PER_THREAD {
                            lock.run_exclusive(|| counter.0.set(counter.0.get() + 1));
                        }
                    });
                }
            });
            black_box(counter.0.get())
        })
    });

    group.finish();
}

fn bench_pointer_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("pointer_lock");

    group.bench_function("lock_unlock_uncontended", |b| {
        let mut value = 0u64;
        let lock = unsafe { PointerLock::new(NonNull::from(&mut value)) };
        b.iter(|| {
            let mut p = lock.lock();
            unsafe { *p.as_mut() += 1 };
            lock.unlock();
        });
    });

    group.bench_function("contended_increments", |b| {
        b.iter(|| {
            let mut value = 0u64;
            let lock = unsafe { PointerLock::new(NonNull::from(&mut value)) };
            let lock = &lock;
            thread::scope(|s| {
                for _ in 0..THREADS {
                    s.spawn(move || {
                        for _ in 0..OPS_PER_THREAD {
                            lock.run_exclusive(|v| *v += 1);
                        }
                    });
                }
            });
            black_box(lock.get())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_counter, bench_pointer_lock);
criterion_main!(benches);
