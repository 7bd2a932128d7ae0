//! A lock folded into the spare bits of the pointer it guards.

use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::Backoff;

use crate::tagged::TaggedWord;

/// Tag bit 0 of the packed word holds the lock flag.
const LOCK_TAG: usize = 1;

/// A pointer whose referent is protected by a lock bit living in the same
/// machine word as the pointer itself.
///
/// When the only thing needing protection is "exclusive access to the object
/// one pointer already references", a separate lock costs a second atomic and
/// often a second cache line. `PointerLock` packs the lock flag into the
/// unused high bits of the pointer (via [`TaggedWord`]), so a single atomic
/// read recovers both who may touch the referent and where it lives.
///
/// The pointer value is fixed at construction and never changes; only the
/// lock bit toggles. The lock protects access to `*ptr`, not the pointer slot
/// itself. Not reentrant; acquisition is the same test-and-test-and-set spin
/// as [`SpinLock`](super::SpinLock), operating on the embedded bit.
pub struct PointerLock<T> {
    word: AtomicUsize,
    _marker: PhantomData<*mut T>,
}

// Safety: the lock bit serializes all access to the referent handed out by
// `lock`/`run_exclusive`, and the construction contract makes this lock the
// only access path to it.
unsafe impl<T: Send> Send for PointerLock<T> {}
unsafe impl<T: Send> Sync for PointerLock<T> {}

impl<T> PointerLock<T> {
    /// Creates an unlocked `PointerLock` guarding `ptr`'s referent.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes for the whole lifetime of the
    /// lock, and all access to the referent must go through this lock; both
    /// are what lets [`run_exclusive`](Self::run_exclusive) hand out
    /// `&mut T`.
    ///
    /// # Panics
    ///
    /// Panics if the address does not fit in
    /// [`ADDR_BITS`](crate::tagged::ADDR_BITS) significant bits.
    pub unsafe fn new(ptr: NonNull<T>) -> Self {
        let word = TaggedWord::new(ptr.as_ptr(), 0);
        Self {
            word: AtomicUsize::new(word.bits()),
            _marker: PhantomData,
        }
    }

    /// Acquires the lock and returns the guarded pointer. Sequentially
    /// consistent.
    #[inline]
    pub fn lock(&self) -> NonNull<T> {
        self.lock_with(Ordering::SeqCst)
    }

    /// Acquires the lock with a caller-chosen success ordering and returns
    /// the guarded pointer, which is the same value on every acquisition.
    pub fn lock_with(&self, order: Ordering) -> NonNull<T> {
        let unlocked = TaggedWord::<T>::from_bits(self.word.load(Ordering::Relaxed)).with_tag(0);
        let locked = unlocked.with_tag(LOCK_TAG);
        let backoff = Backoff::new();
        loop {
            while self.is_locked_with(Ordering::Relaxed) {
                backoff.spin();
            }
            if self
                .word
                .compare_exchange_weak(unlocked.bits(), locked.bits(), order, Ordering::Relaxed)
                .is_ok()
            {
                // Safety: construction packed a NonNull pointer and the
                // address bits never change.
                return unsafe { NonNull::new_unchecked(unlocked.ptr()) };
            }
        }
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
    pub fn unlock_with(&self, order: Ordering) {
        let prev = self.word.fetch_and(!(LOCK_TAG << crate::tagged::ADDR_BITS), order);
        debug_assert!(
            TaggedWord::<T>::from_bits(prev).tag() & LOCK_TAG != 0,
            "unlock of a PointerLock that was not held"
        );
    }

    /// The guarded pointer, without acquiring the lock.
    ///
    /// Dereferencing it without holding the lock races with lock holders.
    #[inline]
    pub fn get(&self) -> NonNull<T> {
        let word = TaggedWord::<T>::from_bits(self.word.load(Ordering::Relaxed));
        // Safety: construction packed a NonNull pointer.
        unsafe { NonNull::new_unchecked(word.ptr()) }
    }

    /// Whether the lock bit is currently set. Sequentially consistent.
    ///
    /// Advisory only; useful for assertions.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.is_locked_with(Ordering::SeqCst)
    }

    /// Whether the lock bit is currently set, loaded with the given ordering.
    #[inline]
    pub fn is_locked_with(&self, order: Ordering) -> bool {
        TaggedWord::<T>::from_bits(self.word.load(order)).tag() & LOCK_TAG != 0
    }

    /// Runs `f` with exclusive access to the referent, releasing the lock on
    /// every exit path including unwind.
    pub fn run_exclusive<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut ptr = self.lock();
        let _release = ReleaseOnDrop(self);
        // Safety: the lock bit is held and the construction contract routes
        // all access to the referent through this lock.
        f(unsafe { ptr.as_mut() })
    }
}

struct ReleaseOnDrop<'a, T>(&'a PointerLock<T>);

impl<T> Drop for ReleaseOnDrop<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.0.unlock_with(Ordering::Release);
    }
}
