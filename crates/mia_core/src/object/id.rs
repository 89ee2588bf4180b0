//! # Object Handles
//!
//! Callers never hold references into the tree; they hold an [`ObjectId`]
//! and hand it back on every call. Slots are recycled after deletion, and
//! the generation half of the handle tells old and new occupants apart.

use std::fmt;

/// Handle to an object living in an [`ObjectTree`](super::ObjectTree).
///
/// Packs the slot number (low half) and the slot's generation at creation
/// time (high half) into one `u64`, so handles are cheap to copy, hash and
/// store in weak references. Once the object is deleted the handle is dead
/// for good: a later object in the same slot carries a newer generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    /// A handle that never names an object, used for "no parent".
    pub const NULL: Self = Self(u64::MAX);

    /// Packs a slot number and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the slot number.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the slot generation this handle was issued for.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns true for [`ObjectId::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("#null")
        } else {
            write!(f, "#{}v{}", self.index(), self.generation())
        }
    }
}
