//! Flat-combining lock.
//!
//! Under heavy contention a plain spin lock makes every thread pay for its own
//! expensive lock-word transition. A flat-combining lock instead lets waiting
//! threads *publish* their critical sections into a shared table; whichever
//! thread wins the combiner flag walks the table once and executes the pending
//! operations on the waiters' behalf. The number of contended flag transitions
//! is then bounded by combiner hand-offs, not by operations, which is where
//! the throughput advantage at high thread counts comes from.
//!
//! Externally the lock behaves exactly like a mutex: every operation runs
//! under exclusion, in some single total order, exactly once, and
//! [`run_exclusive`](FlatCombiningLock::run_exclusive) returns only after the
//! caller's own operation has completed.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{self, AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::cell::RefCell;
use std::sync::{Arc, Weak};

use crossbeam_utils::Backoff;

use super::cache_padded::CachePadded;
use super::spin::SpinLock;

/// Publication slots allocated by [`FlatCombiningLock::new`].
const DEFAULT_SLOTS: usize = 128;

/// Lease marker for a thread that found the table full.
const NO_SLOT: usize = usize::MAX;

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(0);

type SlotTable = [CachePadded<PublicationRecord>];

/// A thread's claim on one publication slot of one lock.
///
/// Held in thread-local storage so the slot is found without scanning on
/// every call, and released when the thread exits. The table is referenced
/// weakly: if the lock died first there is nothing to give back.
struct SlotLease {
    lock_id: u64,
    idx: usize,
    table: Weak<SlotTable>,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if self.idx == NO_SLOT {
            return;
        }
        if let Some(table) = self.table.upgrade() {
            // Release pairs with the acquire CAS of the next claimant, so it
            // observes this record fully quiesced.
            table[self.idx].claimed.store(false, Ordering::Release);
        }
    }
}

std::thread_local! {
    /// This thread's slot leases, one per flat-combining lock it has used.
    /// A handful of entries at most, so a linear scan beats a hash map.
    static SLOT_CACHE: RefCell<Vec<SlotLease>> = const { RefCell::new(Vec::new()) };
}

/// A type-erased pending operation: a trampoline plus a pointer to the
/// closure living on the publishing thread's stack.
#[derive(Clone, Copy)]
struct Task {
    call: unsafe fn(*mut ()),
    data: *mut (),
}

impl Task {
    const IDLE: Self = Self {
        call: idle,
        data: ptr::null_mut(),
    };

    fn erase<F: FnMut()>(f: &mut F) -> Self {
        unsafe fn trampoline<F: FnMut()>(data: *mut ()) {
            (*data.cast::<F>())();
        }
        Self {
            call: trampoline::<F>,
            data: (f as *mut F).cast(),
        }
    }
}

unsafe fn idle(_: *mut ()) {}

/// One per-thread announcement slot in the publication table.
///
/// Protocol: the owning thread writes `task`, clears `done` (relaxed), then
/// sets `active` (release). A combiner claims the publication by CASing
/// `active` back to `false`; the RMW always sees the newest value in the
/// flag's modification order, so a claim can never latch onto a stale
/// publication and each publication is executed exactly once. After running
/// the task the combiner sets `done` (release); the owner spins on `done` and
/// does not touch the record again until then.
struct PublicationRecord {
    /// Slot membership: set while some live thread holds this slot.
    claimed: AtomicBool,
    active: AtomicBool,
    done: AtomicBool,
    task: UnsafeCell<Task>,
}

impl PublicationRecord {
    const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
            active: AtomicBool::new(false),
            done: AtomicBool::new(false),
            task: UnsafeCell::new(Task::IDLE),
        }
    }
}

/// A scalable busy-wait lock that batches contended critical sections.
///
/// Each lock owns its own combiner flag and publication table; there is no
/// process-wide state beyond the id counter used for thread-local slot
/// caching. A thread claims one slot per lock on first use, keeps it until
/// the thread exits, and threads that find the table full fall back to
/// acquiring the combiner flag directly, so correctness does not depend on
/// the capacity.
///
/// Not reentrant: calling [`run_exclusive`](Self::run_exclusive) from inside
/// a running operation deadlocks.
pub struct FlatCombiningLock {
    id: u64,
    combiner: SpinLock,
    /// Upper bound on ever-claimed slot indices; bounds the combiner's walk.
    high_water: AtomicUsize,
    slots: Arc<SlotTable>,
}

// Safety: records hold raw pointers into publishing threads' stacks, but a
// pointer is only dereferenced by the combiner between the owner's release
// publication and the combiner's release of `done`, while the owner is
// spinning inside `run_exclusive` and its frame is pinned.
unsafe impl Send for FlatCombiningLock {}
unsafe impl Sync for FlatCombiningLock {}

impl FlatCombiningLock {
    /// Creates a lock with the default publication capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SLOTS)
    }

    /// Creates a lock with room for `capacity` concurrently publishing
    /// threads.
    ///
    /// Threads beyond the capacity still work; they take the direct spin path
    /// instead of publishing.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "publication table needs at least one slot");
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            combiner: SpinLock::new(),
            high_water: AtomicUsize::new(0),
            slots: (0..capacity)
                .map(|_| CachePadded::new(PublicationRecord::new()))
                .collect(),
        }
    }

    /// Runs `f` with exclusion against every other concurrent
    /// `run_exclusive` call on this lock, returning its result.
    ///
    /// The operation may execute on another thread (the current combiner),
    /// which is why `F` and `R` must be `Send`. The call returns only after
    /// the operation has run exactly once.
    ///
    /// An operation that panics has no defined recovery: a panic on the
    /// combiner thread can leave other waiters spinning. Treat a panicking
    /// critical section as a bug, not a recoverable condition.
    pub fn run_exclusive<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match self.slot_for_current_thread() {
            Some(idx) => self.run_published(idx, f),
            // Table exhausted: exclusion still holds because every combined
            // task runs under the same combiner flag we acquire here.
            None => self.combiner.run_exclusive(f),
        }
    }

    /// Whether some thread currently holds the combiner role. Sequentially
    /// consistent.
    ///
    /// Advisory only, useful for assertions.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.combiner.is_locked()
    }

    /// Whether some thread currently holds the combiner role, loaded with
    /// the given ordering.
    #[inline]
    pub fn is_locked_with(&self, order: Ordering) -> bool {
        self.combiner.is_locked_with(order)
    }

    /// Number of publication slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn run_published<R, F>(&self, idx: usize, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        let record: &PublicationRecord = &self.slots[idx];
        let mut f = Some(f);
        let mut out = None;
        {
            let mut thunk = || out = Some((f.take().expect("operation ran twice"))());
            let task = Task::erase(&mut thunk);
            // Task first, then done, then active (release): a combiner that
            // claims the record is guaranteed to see this publication's task.
            unsafe {
                *record.task.get() = task;
            }
            record.done.store(false, Ordering::Relaxed);
            record.active.store(true, Ordering::Release);
            self.wait_until_done(record);
        }
        out.expect("record marked done without running its operation")
    }

    /// Spins until this thread's record is done, volunteering for the
    /// combiner role along the way.
    ///
    /// The volunteer step is what makes the scheme live: if the previous
    /// combiner finished its pass before our publication became visible and
    /// nobody else is waiting, we become the combiner and serve ourselves.
    fn wait_until_done(&self, record: &PublicationRecord) {
        let backoff = Backoff::new();
        while !record.done.load(Ordering::Relaxed) {
            if self.combiner.try_lock_with(Ordering::Acquire) {
                self.combine();
                self.combiner.unlock_with(Ordering::Release);
            } else {
                backoff.spin();
            }
        }
        // Pair with the combiner's release store of `done`.
        atomic::fence(Ordering::Acquire);
    }

    /// One full pass over the slot table, executing every pending
    /// publication. Caller must hold the combiner flag.
    fn combine(&self) {
        let bound = self.high_water.load(Ordering::Acquire);
        for slot in &self.slots[..bound] {
            if slot.active.load(Ordering::Relaxed)
                && slot
                    .active
                    .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                let task = unsafe { *slot.task.get() };
                // Safety: the successful claim synchronizes with the owner's
                // release publication, so `task` is fully written and its
                // closure frame stays pinned until we set `done`.
                unsafe {
                    (task.call)(task.data);
                }
                slot.done.store(true, Ordering::Release);
            }
        }
    }

    /// Returns this thread's slot index for this lock, claiming one on first
    /// use, or `None` if the table is full.
    ///
    /// A lease that was cached slotless retries the claim on every call:
    /// slots freed by exited threads would otherwise stay unreachable to the
    /// threads that once saw a full table.
    fn slot_for_current_thread(&self) -> Option<usize> {
        SLOT_CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            if let Some(lease) = cache.iter_mut().find(|lease| lease.lock_id == self.id) {
                if lease.idx == NO_SLOT {
                    if let Some(idx) = self.claim_slot() {
                        lease.idx = idx;
                    }
                }
                return (lease.idx != NO_SLOT).then_some(lease.idx);
            }
            // A miss means paying for a claim scan anyway, so use it to drop
            // leases whose locks have died; otherwise a long-lived thread
            // cycling through short-lived locks grows the cache without
            // bound. Dropping a dead lease is a no-op (the upgrade fails).
            cache.retain(|lease| lease.table.strong_count() > 0);
            let idx = self.claim_slot();
            cache.push(SlotLease {
                lock_id: self.id,
                idx: idx.unwrap_or(NO_SLOT),
                table: Arc::downgrade(&self.slots),
            });
            idx
        })
    }

    #[cfg(test)]
    pub(crate) fn current_thread_slot(&self) -> Option<usize> {
        self.slot_for_current_thread()
    }

    /// Claims the first free slot. Slots freed by exited threads are reused.
    fn claim_slot(&self) -> Option<usize> {
        for (idx, slot) in self.slots.iter().enumerate() {
            if !slot.claimed.load(Ordering::Relaxed)
                && slot
                    .claimed
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                self.high_water.fetch_max(idx + 1, Ordering::AcqRel);
                return Some(idx);
            }
        }
        None
    }
}

impl Default for FlatCombiningLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of slot leases the current thread is holding, live or dead.
#[cfg(test)]
pub(crate) fn cached_slot_leases() -> usize {
    SLOT_CACHE.with(|cache| cache.borrow().len())
}
