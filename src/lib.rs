//! # `vise` - Busy-Wait Synchronization Toolkit
//!
//! A small toolkit of spin-based exclusion primitives for short,
//! highly-contended critical sections, built to stay out of the kernel
//! entirely: every wait is a spin, never a syscall.
//!
//! ## Primitives
//!
//! 1. **[`SpinLock`]**: the baseline. A single atomic flag acquired with
//!    test-and-test-and-set, so waiters spin on cheap shared reads and only
//!    go exclusive when the flag looks free.
//!
//! 2. **[`FlatCombiningLock`]**: the scalable one. Contending threads publish
//!    their critical sections into a per-lock table; whichever thread wins
//!    the combiner flag executes a whole batch of them in one pass. The cost
//!    of winning the lock is amortized across the batch instead of paid per
//!    operation, which is what keeps throughput up at high thread counts.
//!
//! 3. **[`PointerLock`]**: a mutex and the pointer it guards collapsed into
//!    one machine word. The lock flag lives in the pointer's unused high
//!    bits, so a single atomic word answers both "who may touch the
//!    referent" and "where it is".
//!
//! 4. **[`TaggedWord`]**: the packing primitive underneath `PointerLock`,
//!    usable standalone wherever a pointer should carry a small counter or
//!    epoch without growing past one word.
//!
//! ## Contract
//!
//! The locks own nothing but their own flag bits and publication records;
//! the protected state belongs to the caller and is touched only by the
//! operations the caller supplies. Every variant offers the same surface:
//! acquire and release (optionally with an explicit memory ordering), an
//! advisory is-held query, and a scoped `run_exclusive` that executes an
//! operation under exclusion and releases on every exit path.
//!
//! Misuse is a contract violation, not a recoverable error: releasing a lock
//! you do not hold or overflowing `TaggedWord`'s bit widths asserts in
//! checked builds rather than returning a `Result`. Transient contention is
//! never surfaced; it is resolved by spinning.
//!
//! ## Limits
//!
//! No fairness beyond what the algorithms provide structurally, no
//! reentrancy, no timeouts, no blocking fallback, no cross-process use.
//! Spinning assumes short critical sections and cores to spare; on a heavily
//! oversubscribed scheduler a blocking mutex will serve you better.
//!
//! ## Example
//!
//! ```rust
//! use vise::FlatCombiningLock;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let lock = FlatCombiningLock::new();
//! let counter = AtomicUsize::new(0);
//!
//! std::thread::scope(|s| {
//!     for _ in 0..4 {
//!         s.spawn(|| {
//!             for _ in 0..1000 {
//!                 lock.run_exclusive(|| {
//!                     let v = counter.load(Ordering::Relaxed);
//!                     counter.store(v + 1, Ordering::Relaxed);
//!                 });
//!             }
//!         });
//!     }
//! });
//!
//! assert_eq!(counter.load(Ordering::Relaxed), 4000);
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::inline_always)]

pub mod sync;
pub mod tagged;

pub use sync::{CachePadded, FlatCombiningLock, PointerLock, SpinLock};
pub use tagged::TaggedWord;
