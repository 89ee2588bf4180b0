//! # Allocator Interface
//!
//! The trait every root allocator implements, plus the [`Block`] handle it
//! hands out in place of a raw pointer.

use std::fmt;

use crate::error::AllocResult;

/// The family an allocator belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    /// One heap buffer per block.
    Heap,
    /// Fixed-size blocks carved out of pools.
    Pool,
    /// Bump allocation in a single region.
    Arena,
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Heap => "heap",
            Self::Pool => "pool",
            Self::Arena => "arena",
        })
    }
}

/// Where a block lives inside its allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Origin {
    /// Slot in a heap slab.
    Heap { slot: u32, generation: u32 },
    /// Block `slot` (global index across all pools).
    Pool { slot: u32, generation: u32 },
    /// Byte offset into an arena region, tagged with the serial of the
    /// allocation that produced it.
    Arena { offset: usize, serial: u64 },
}

/// Handle to a block of bytes owned by an allocator.
///
/// Blocks are plain `Copy` values; the bytes are reached through
/// [`Allocator::bytes`] and [`Allocator::bytes_mut`]. A handle outliving its
/// allocation resolves to [`AllocError::InvalidBlock`](crate::AllocError)
/// instead of touching reused memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    pub(crate) origin: Origin,
    len: usize,
}

impl Block {
    #[inline]
    pub(crate) const fn new(origin: Origin, len: usize) -> Self {
        Self { origin, len }
    }

    /// Returns the usable size of the block in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true for zero-sized blocks.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Snapshot of an allocator's bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Allocator family.
    pub kind: AllocatorKind,
    /// Blocks currently handed out (including heap fallbacks of a pool).
    pub live_blocks: usize,
    /// Bytes currently handed out.
    pub live_bytes: usize,
    /// Total pooled blocks reserved (0 if not a pool allocator).
    pub blocks_num: usize,
    /// Pooled blocks in use (0 if not a pool allocator).
    pub blocks_used: usize,
}

/// Memory provider owned by a tree root.
///
/// All operations are synchronous; an allocator is only ever touched by the
/// thread that owns its tree.
pub trait Allocator {
    /// Returns the allocator family.
    fn kind(&self) -> AllocatorKind;

    /// Allocates `size` bytes. The contents are unspecified.
    ///
    /// # Errors
    ///
    /// [`AllocError::OutOfMemory`](crate::AllocError::OutOfMemory) if the
    /// request cannot be satisfied.
    fn allocate(&mut self, size: usize) -> AllocResult<Block>;

    /// Allocates `size` zeroed bytes.
    ///
    /// # Errors
    ///
    /// Same as [`Allocator::allocate`].
    fn allocate_zeroed(&mut self, size: usize) -> AllocResult<Block> {
        let block = self.allocate(size)?;
        self.bytes_mut(&block)?.fill(0);
        Ok(block)
    }

    /// Grows or shrinks a block, keeping the common prefix of its bytes.
    ///
    /// The returned handle replaces `block`, which must not be used again.
    ///
    /// # Errors
    ///
    /// `InvalidBlock` for stale handles, `OutOfMemory` if the new size
    /// cannot be provided (the old block stays valid in that case).
    fn reallocate(&mut self, block: Block, new_size: usize) -> AllocResult<Block>;

    /// Releases a block.
    ///
    /// # Errors
    ///
    /// `DoubleFree` or `InvalidBlock` when the handle is not live.
    fn free(&mut self, block: Block) -> AllocResult<()>;

    /// Reads a block.
    ///
    /// # Errors
    ///
    /// `InvalidBlock` when the handle is not live.
    fn bytes(&self, block: &Block) -> AllocResult<&[u8]>;

    /// Writes a block.
    ///
    /// # Errors
    ///
    /// `InvalidBlock` when the handle is not live.
    fn bytes_mut(&mut self, block: &Block) -> AllocResult<&mut [u8]>;

    /// Returns the current bookkeeping counters.
    fn stats(&self) -> AllocatorStats;
}

/// Copies the common prefix of `from` into `to`.
#[inline]
pub(crate) fn copy_prefix(from: &[u8], to: &mut [u8]) {
    let n = from.len().min(to.len());
    to[..n].copy_from_slice(&from[..n]);
}
