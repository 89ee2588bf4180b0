//! # Arena Allocator
//!
//! A simple bump allocator for short-lived trees that are freed all at once.

use std::collections::HashMap;

use super::allocator::{Allocator, AllocatorKind, AllocatorStats, Block, Origin};
use crate::error::{AllocError, AllocResult};

/// Every allocation starts on this boundary.
const ARENA_ALIGN: usize = 16;

#[inline]
const fn align_up(n: usize) -> usize {
    (n + ARENA_ALIGN - 1) & !(ARENA_ALIGN - 1)
}

/// A bump-pointer arena allocator.
///
/// Allocations are fast (just bump an offset). Only the most recent
/// allocation can be freed or grown in place; freeing anything else only
/// retires the handle and its bytes come back when the arena is cleared or
/// dropped.
///
/// Every allocation gets a fresh serial. A handle resolves only while its
/// serial is the one recorded for its offset, so freed, resized and
/// cleared blocks never reach bytes handed out later.
///
/// # Thread Safety
///
/// This arena is NOT thread-safe. It belongs to exactly one tree root.
///
/// # Example
///
/// ```rust
/// use mia_core::memory::{Allocator, ArenaAllocator};
///
/// let mut arena = ArenaAllocator::new(1024);
/// let block = arena.allocate(100).unwrap();
/// assert!(arena.used() >= 100);
///
/// // Reset to free all allocations
/// arena.clear();
/// assert_eq!(arena.used(), 0);
/// assert!(arena.bytes(&block).is_err());
/// ```
pub struct ArenaAllocator {
    /// The backing storage.
    region: Box<[u8]>,
    /// Current allocation offset.
    used: usize,
    /// Offset of the newest allocation, if it is still live.
    last: Option<usize>,
    /// Serial of the live allocation at each offset.
    live: HashMap<usize, u64>,
    next_serial: u64,
    /// First serial issued since the last `clear`.
    cleared_at: u64,
    live_blocks: usize,
    live_bytes: usize,
}

impl ArenaAllocator {
    /// Creates a new arena with the specified capacity in bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            region: vec![0u8; capacity].into_boxed_slice(),
            used: 0,
            last: None,
            live: HashMap::new(),
            next_serial: 0,
            cleared_at: 0,
            live_blocks: 0,
            live_bytes: 0,
        }
    }

    /// Returns the total capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Returns the current used space in bytes.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Returns the remaining free space in bytes.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used
    }

    /// Resets the arena, invalidating all previous allocations.
    ///
    /// Outstanding blocks resolve to `InvalidBlock` afterwards.
    pub fn clear(&mut self) {
        self.used = 0;
        self.last = None;
        self.live.clear();
        self.cleared_at = self.next_serial;
        self.live_blocks = 0;
        self.live_bytes = 0;
    }

    fn offset_of(&self, block: &Block) -> AllocResult<usize> {
        let Origin::Arena { offset, serial } = block.origin else {
            return Err(AllocError::ForeignBlock(AllocatorKind::Arena));
        };
        if self.live.get(&offset) != Some(&serial) {
            return Err(AllocError::InvalidBlock);
        }
        Ok(offset)
    }

    /// Returns true if `block` was handed out since the last `clear` and has
    /// been freed or replaced since.
    fn retired(&self, block: &Block) -> bool {
        matches!(
            block.origin,
            Origin::Arena { serial, .. } if serial >= self.cleared_at && serial < self.next_serial
        )
    }

    fn issue(&mut self, offset: usize, size: usize) -> Block {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.live.insert(offset, serial);
        Block::new(Origin::Arena { offset, serial }, size)
    }

    fn bump(&mut self, offset: usize, size: usize) -> AllocResult<()> {
        // Zero-sized blocks still take a slot so every block is distinct
        let end = offset.saturating_add(align_up(size.max(1)));
        if end > self.capacity() {
            tracing::debug!("failed to allocate {} bytes, arena has {} left", size, self.remaining());
            return Err(AllocError::OutOfMemory {
                requested: size,
                allocator: AllocatorKind::Arena,
            });
        }
        self.used = end;
        self.last = Some(offset);
        Ok(())
    }
}

impl Allocator for ArenaAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Arena
    }

    fn allocate(&mut self, size: usize) -> AllocResult<Block> {
        let offset = self.used;
        self.bump(offset, size)?;
        self.live_blocks += 1;
        self.live_bytes += size;
        Ok(self.issue(offset, size))
    }

    fn reallocate(&mut self, block: Block, new_size: usize) -> AllocResult<Block> {
        let offset = self.offset_of(&block)?;
        let old_size = block.len();

        if self.last == Some(offset) {
            // Newest allocation: grow or shrink in place
            self.bump(offset, new_size)?;
            if new_size > old_size {
                self.region[offset + old_size..offset + new_size].fill(0);
            }
            self.live_bytes = self.live_bytes - old_size + new_size;
            return Ok(self.issue(offset, new_size));
        }

        let moved = self.allocate(new_size)?;
        let Origin::Arena { offset: to, .. } = moved.origin else {
            return Err(AllocError::InvalidBlock);
        };
        let n = old_size.min(new_size);
        self.region.copy_within(offset..offset + n, to);
        // The old bytes stay reserved until `clear`
        self.live.remove(&offset);
        self.live_blocks -= 1;
        self.live_bytes -= old_size;
        Ok(moved)
    }

    fn free(&mut self, block: Block) -> AllocResult<()> {
        let offset = match self.offset_of(&block) {
            Ok(offset) => offset,
            Err(AllocError::InvalidBlock) if self.retired(&block) => {
                tracing::warn!("arena free of a block that is already gone");
                return Err(AllocError::DoubleFree);
            }
            Err(err) => return Err(err),
        };
        self.live.remove(&offset);
        if self.last == Some(offset) {
            self.used = offset;
            self.last = None;
        }
        self.live_blocks -= 1;
        self.live_bytes -= block.len();
        Ok(())
    }

    fn bytes(&self, block: &Block) -> AllocResult<&[u8]> {
        let offset = self.offset_of(block)?;
        self.region
            .get(offset..offset + block.len())
            .ok_or(AllocError::InvalidBlock)
    }

    fn bytes_mut(&mut self, block: &Block) -> AllocResult<&mut [u8]> {
        let offset = self.offset_of(block)?;
        self.region
            .get_mut(offset..offset + block.len())
            .ok_or(AllocError::InvalidBlock)
    }

    fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            kind: AllocatorKind::Arena,
            live_blocks: self.live_blocks,
            live_bytes: self.live_bytes,
            blocks_num: 0,
            blocks_used: 0,
        }
    }
}
