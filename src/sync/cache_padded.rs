//! Cache-line padding for contended atomics.

use core::ops::{Deref, DerefMut};

/// Aligns a value to its own cache line so neighboring slots never share one.
///
/// Publication records are written by different threads; without padding,
/// two records in adjacent table entries would ping the same line between
/// cores. 128 bytes covers both common line sizes (x86 is 64, Apple Silicon
/// prefetches in pairs).
#[repr(align(128))]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    /// Wraps a value in its own cache line.
    pub const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
