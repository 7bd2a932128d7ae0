//! Pointer/tag packing into a single machine word.
//!
//! On 64-bit hardware the upper bits of a canonical user-space address are
//! unused; [`TaggedWord`] folds a small integer tag into them so a pointer can
//! carry a side-channel value (a generation counter, an epoch, a lock flag)
//! without growing past one word. This is the physical representation behind
//! [`PointerLock`](crate::PointerLock).
//!
//! Packing raw addresses is inherently platform-dependent: it assumes 48
//! significant address bits, which holds for x86-64 and AArch64 user space
//! but not for full-width virtual addressing. The crate refuses to build on
//! non-64-bit targets.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

#[cfg(not(target_pointer_width = "64"))]
compile_error!("vise packs tags into high pointer bits and requires a 64-bit target");

/// Number of significant address bits a packed pointer may use.
pub const ADDR_BITS: u32 = 48;

/// Number of bits reserved for the tag.
pub const TAG_BITS: u32 = 16;

/// Largest tag value a [`TaggedWord`] can carry.
pub const MAX_TAG: usize = (1 << TAG_BITS) - 1;

const ADDR_MASK: usize = (1 << ADDR_BITS) - 1;

/// A pointer and a small integer tag packed into one `usize`.
///
/// `TaggedWord` is a plain value: it does not own, borrow, or dereference the
/// pointee. Two words are equal iff both the address and the tag match, which
/// coincides with equality of the packed representation.
///
/// # Panics
///
/// Construction asserts that the address fits in [`ADDR_BITS`] bits and the
/// tag in [`TAG_BITS`] bits. Overflowing either is a caller bug, not a
/// recoverable condition, so there is no fallible constructor.
#[repr(transparent)]
pub struct TaggedWord<T> {
    bits: usize,
    _marker: PhantomData<*mut T>,
}

impl<T> TaggedWord<T> {
    /// Packs `ptr` and `tag` into a single word.
    #[inline]
    pub fn new(ptr: *mut T, tag: usize) -> Self {
        let addr = ptr as usize;
        assert!(
            addr >> ADDR_BITS == 0,
            "pointer address {addr:#x} exceeds {ADDR_BITS} significant bits"
        );
        assert!(tag <= MAX_TAG, "tag {tag} exceeds {TAG_BITS} bits");
        Self {
            bits: (tag << ADDR_BITS) | addr,
            _marker: PhantomData,
        }
    }

    /// Reinterprets a packed word produced by [`bits`](Self::bits).
    #[inline(always)]
    pub(crate) const fn from_bits(bits: usize) -> Self {
        Self {
            bits,
            _marker: PhantomData,
        }
    }

    /// The packed pointer, tag bits stripped.
    #[inline(always)]
    pub fn ptr(self) -> *mut T {
        (self.bits & ADDR_MASK) as *mut T
    }

    /// The packed tag.
    #[inline(always)]
    pub fn tag(self) -> usize {
        self.bits >> ADDR_BITS
    }

    /// The raw packed representation.
    #[inline(always)]
    pub fn bits(self) -> usize {
        self.bits
    }

    /// Returns a copy of this word with the given tag, address unchanged.
    #[inline]
    pub fn with_tag(self, tag: usize) -> Self {
        assert!(tag <= MAX_TAG, "tag {tag} exceeds {TAG_BITS} bits");
        Self {
            bits: (tag << ADDR_BITS) | (self.bits & ADDR_MASK),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for TaggedWord<T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TaggedWord<T> {}

impl<T> PartialEq for TaggedWord<T> {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<T> Eq for TaggedWord<T> {}

impl<T> Hash for TaggedWord<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits.hash(state);
    }
}

impl<T> fmt::Debug for TaggedWord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedWord")
            .field("ptr", &self.ptr())
            .field("tag", &self.tag())
            .finish()
    }
}
