//! Busy-wait exclusion primitives.
//!
//! All waiting here is spinning; nothing in this module ever blocks in the
//! kernel or yields to the scheduler. That makes the primitives suitable for
//! short, hot critical sections and unsuitable for anything that can hold a
//! lock across a blocking call. None of them are reentrant.

pub mod cache_padded;
pub mod flat;
pub mod pointer;
pub mod spin;

pub use cache_padded::CachePadded;
pub use flat::FlatCombiningLock;
pub use pointer::PointerLock;
pub use spin::SpinLock;

#[cfg(test)]
mod tests;
