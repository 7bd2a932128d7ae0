use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Barrier;

use super::{flat, FlatCombiningLock, PointerLock, SpinLock};

#[test]
fn spin_lock_transitions() {
    let lock = SpinLock::new();
    assert!(!lock.is_locked());
    lock.lock();
    assert!(lock.is_locked());
    lock.unlock();
    assert!(!lock.is_locked());
}

#[test]
fn spin_try_lock_fails_while_held() {
    let lock = SpinLock::new();
    assert!(lock.try_lock());
    assert!(!lock.try_lock());
    lock.unlock();
    assert!(lock.try_lock());
    lock.unlock();
}

#[test]
fn spin_run_exclusive_returns_value() {
    let lock = SpinLock::new();
    let out = lock.run_exclusive(|| 41 + 1);
    assert_eq!(out, 42);
    assert!(!lock.is_locked());
}

#[test]
fn spin_run_exclusive_releases_on_unwind() {
    let lock = SpinLock::new();
    let result = catch_unwind(AssertUnwindSafe(|| {
        lock.run_exclusive(|| panic!("critical section failed"));
    }));
    assert!(result.is_err());
    assert!(!lock.is_locked(), "lock must be released after a panic");
}

#[test]
fn flat_run_exclusive_returns_value() {
    let lock = FlatCombiningLock::new();
    let out = lock.run_exclusive(|| "done");
    assert_eq!(out, "done");
    assert!(!lock.is_locked());
}

#[test]
fn flat_slot_is_reused_across_calls() {
    let lock = FlatCombiningLock::new();
    let counter = AtomicUsize::new(0);
    for _ in 0..1000 {
        lock.run_exclusive(|| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }
    assert_eq!(counter.load(Ordering::Relaxed), 1000);
}

#[test]
fn flat_overflow_threads_take_direct_path() {
    // Capacity 1: the first thread to publish claims the only slot, every
    // other thread falls back to the direct spin path. The counter law must
    // hold regardless of which path each thread took.
    let lock = FlatCombiningLock::with_capacity(1);
    assert_eq!(lock.capacity(), 1);
    let counter = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..500 {
                    lock.run_exclusive(|| {
                        let v = counter.load(Ordering::Relaxed);
                        counter.store(v + 1, Ordering::Relaxed);
                    });
                }
            });
        }
    });

    assert_eq!(counter.load(Ordering::Relaxed), 4 * 500);
}

#[test]
fn flat_dead_locks_are_pruned_from_the_slot_cache() {
    // Each test runs on its own thread, so the slot cache starts empty.
    // Cycling through short-lived locks must not grow it: the miss for each
    // new lock prunes the leases whose locks have already died.
    for _ in 0..64 {
        let lock = FlatCombiningLock::new();
        lock.run_exclusive(|| ());
    }
    let lock = FlatCombiningLock::new();
    lock.run_exclusive(|| ());
    assert_eq!(flat::cached_slot_leases(), 1);
}

#[test]
fn flat_full_table_recovers_after_a_thread_exits() {
    let lock = FlatCombiningLock::with_capacity(1);
    let barrier = Barrier::new(2);

    std::thread::scope(|s| {
        s.spawn(|| {
            // Claim the only slot, then keep it until the main thread has
            // seen the table full.
            lock.run_exclusive(|| ());
            barrier.wait();
            barrier.wait();
        });

        barrier.wait();
        assert_eq!(lock.current_thread_slot(), None);
        // Slotless threads still get exclusion via the direct path.
        lock.run_exclusive(|| ());
        barrier.wait();
    });

    // The worker exited and its lease gave the slot back; a thread that once
    // saw a full table must be able to pick it up.
    assert_eq!(lock.current_thread_slot(), Some(0));
    lock.run_exclusive(|| ());
}

#[test]
fn flat_is_locked_with_tracks_the_combiner_flag() {
    let lock = FlatCombiningLock::new();
    assert!(!lock.is_locked_with(Ordering::Relaxed));
    lock.run_exclusive(|| {
        // The operation always runs under the combiner flag, whichever path
        // executed it.
        assert!(lock.is_locked_with(Ordering::Relaxed));
    });
    assert!(!lock.is_locked_with(Ordering::SeqCst));
}

#[test]
fn pointer_lock_identity_is_stable() {
    let mut value = 0u64;
    let ptr = NonNull::from(&mut value);
    // Safety: `value` outlives the lock and is only touched through it.
    let lock = unsafe { PointerLock::new(ptr) };

    for _ in 0..100 {
        let locked = lock.lock();
        assert_eq!(locked, ptr);
        lock.unlock();
    }
    assert_eq!(lock.get(), ptr);
}

#[test]
fn pointer_lock_bit_toggles() {
    let mut value = 0u32;
    let lock = unsafe { PointerLock::new(NonNull::from(&mut value)) };
    assert!(!lock.is_locked());
    let _ = lock.lock();
    assert!(lock.is_locked());
    lock.unlock();
    assert!(!lock.is_locked());
}

#[test]
fn pointer_lock_run_exclusive_mutates_referent() {
    let mut value = 10u64;
    let lock = unsafe { PointerLock::new(NonNull::from(&mut value)) };
    let doubled = lock.run_exclusive(|v| {
        *v *= 2;
        *v
    });
    assert_eq!(doubled, 20);
    assert!(!lock.is_locked());
    drop(lock);
    assert_eq!(value, 20);
}

#[test]
fn pointer_lock_run_exclusive_releases_on_unwind() {
    let mut value = 0u64;
    let lock = unsafe { PointerLock::new(NonNull::from(&mut value)) };
    let result = catch_unwind(AssertUnwindSafe(|| {
        lock.run_exclusive(|_| panic!("critical section failed"));
    }));
    assert!(result.is_err());
    assert!(!lock.is_locked());
}
