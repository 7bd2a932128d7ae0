//! Test-and-test-and-set spin lock.

use core::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::Backoff;

/// A busy-wait mutual exclusion flag.
///
/// `SpinLock` protects whatever critical-section logic the caller runs between
/// [`lock`](Self::lock) and [`unlock`](Self::unlock); it owns no data of its
/// own. Acquisition is test-and-test-and-set: waiters spin on cheap relaxed
/// loads of the flag and only attempt the exclusive swap once they observe it
/// clear, keeping the cache line quiet under contention.
///
/// There is no fairness guarantee, no timeout, and no blocking fallback; a
/// waiting thread burns CPU until the holder releases. Keep critical sections
/// short and never hold the lock across a blocking call. The lock is not
/// reentrant: re-acquiring on the same thread deadlocks.
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    /// Creates an unlocked `SpinLock`.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Acquires the lock, spinning until it is free. Sequentially consistent.
    #[inline]
    pub fn lock(&self) {
        self.lock_with(Ordering::SeqCst);
    }

    /// Acquires the lock with a caller-chosen success ordering.
    ///
    /// `Ordering::Acquire` is the weakest ordering that still publishes the
    /// previous holder's critical-section writes to this thread.
    #[inline]
    pub fn lock_with(&self, order: Ordering) {
        let backoff = Backoff::new();
        loop {
            // Wait on relaxed loads first; the swap below is the only
            // operation that takes the line exclusive.
            while self.locked.load(Ordering::Relaxed) {
                backoff.spin();
            }
            if !self.locked.swap(true, order) {
                return;
            }
        }
    }

    /// Attempts to acquire the lock once, without spinning.
    ///
    /// Returns `true` on success. Sequentially consistent.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.try_lock_with(Ordering::SeqCst)
    }

    /// Attempts to acquire the lock once with a caller-chosen ordering.
    #[inline]
    pub fn try_lock_with(&self, order: Ordering) -> bool {
        !self.locked.load(Ordering::Relaxed) && !self.locked.swap(true, order)
    }

    /// Releases the lock. Sequentially consistent.
    ///
    /// The caller must currently hold the lock; releasing an unheld lock is a
    /// contract violation caught by a debug assertion.
    #[inline]
    pub fn unlock(&self) {
        self.unlock_with(Ordering::SeqCst);
    }

    /// Releases the lock with a caller-chosen ordering.
    ///
    /// `Ordering::Release` is the weakest ordering that still publishes this
    /// thread's critical-section writes to the next acquirer.
    #[inline]
    pub fn unlock_with(&self, order: Ordering) {
        let was_locked = self.locked.swap(false, order);
        debug_assert!(was_locked, "unlock of a SpinLock that was not held");
    }

    /// Whether the lock is currently held. Sequentially consistent.
    ///
    /// Advisory only: the answer can be stale by the time the caller acts on
    /// it. Useful for assertions, never for synchronization decisions.
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.is_locked_with(Ordering::SeqCst)
    }

    /// Whether the lock is currently held, loaded with the given ordering.
    #[inline(always)]
    pub fn is_locked_with(&self, order: Ordering) -> bool {
        self.locked.load(order)
    }

    /// Runs `f` under the lock, releasing on every exit path.
    ///
    /// The lock is released when `f` returns and also when `f` unwinds, so a
    /// panicking critical section does not wedge other threads.
    #[inline]
    pub fn run_exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        self.lock();
        let _release = ReleaseOnDrop(self);
        f()
    }
}

impl Default for SpinLock {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

struct ReleaseOnDrop<'a>(&'a SpinLock);

impl Drop for ReleaseOnDrop<'_> {
    #[inline]
    fn drop(&mut self) {
        self.0.unlock_with(Ordering::Release);
    }
}
