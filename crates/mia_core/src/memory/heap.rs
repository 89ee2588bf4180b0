//! # Heap Allocator
//!
//! One boxed buffer per block, tracked in a generational slab so stale
//! handles are caught instead of reading reused memory.

use super::allocator::{copy_prefix, Allocator, AllocatorKind, AllocatorStats, Block, Origin};
use crate::error::{AllocError, AllocResult};

/// A slab slot. `data` is `None` while the slot is free.
struct HeapSlot {
    generation: u32,
    data: Option<Box<[u8]>>,
}

/// General purpose allocator backed by the global heap.
///
/// # Example
///
/// ```rust
/// use mia_core::memory::{Allocator, HeapAllocator};
///
/// let mut heap = HeapAllocator::new();
/// let block = heap.allocate_zeroed(64).unwrap();
/// heap.bytes_mut(&block).unwrap()[0] = 7;
/// assert_eq!(heap.bytes(&block).unwrap()[0], 7);
/// heap.free(block).unwrap();
/// ```
pub struct HeapAllocator {
    slots: Vec<HeapSlot>,
    free_slots: Vec<u32>,
    live_blocks: usize,
    live_bytes: usize,
    /// Optional budget; exceeding it is reported as out of memory.
    max_bytes: Option<usize>,
}

impl HeapAllocator {
    /// Creates an unbounded heap allocator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            live_blocks: 0,
            live_bytes: 0,
            max_bytes: None,
        }
    }

    /// Creates a heap allocator that refuses to hand out more than
    /// `max_bytes` bytes at once.
    #[must_use]
    pub fn with_budget(max_bytes: usize) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            ..Self::new()
        }
    }

    /// Returns the number of live blocks.
    #[inline]
    #[must_use]
    pub const fn live_blocks(&self) -> usize {
        self.live_blocks
    }

    /// Returns the number of live bytes.
    #[inline]
    #[must_use]
    pub const fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    fn check_budget(&self, extra: usize) -> AllocResult<()> {
        match self.max_bytes {
            Some(max) if self.live_bytes.saturating_add(extra) > max => {
                tracing::debug!(
                    "heap budget exceeded: {} live + {} requested > {}",
                    self.live_bytes,
                    extra,
                    max
                );
                Err(AllocError::OutOfMemory {
                    requested: extra,
                    allocator: AllocatorKind::Heap,
                })
            }
            _ => Ok(()),
        }
    }

    fn slot(&self, block: &Block) -> AllocResult<&HeapSlot> {
        let Origin::Heap { slot, generation } = block.origin else {
            return Err(AllocError::ForeignBlock(AllocatorKind::Heap));
        };
        let entry = self
            .slots
            .get(slot as usize)
            .ok_or(AllocError::InvalidBlock)?;
        if entry.generation != generation {
            return Err(AllocError::InvalidBlock);
        }
        Ok(entry)
    }

    fn slot_mut(&mut self, block: &Block) -> AllocResult<&mut HeapSlot> {
        let Origin::Heap { slot, generation } = block.origin else {
            return Err(AllocError::ForeignBlock(AllocatorKind::Heap));
        };
        let entry = self
            .slots
            .get_mut(slot as usize)
            .ok_or(AllocError::InvalidBlock)?;
        if entry.generation != generation {
            return Err(AllocError::InvalidBlock);
        }
        Ok(entry)
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for HeapAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Heap
    }

    fn allocate(&mut self, size: usize) -> AllocResult<Block> {
        self.check_budget(size)?;

        let data = vec![0u8; size].into_boxed_slice();
        let (slot, generation) = if let Some(slot) = self.free_slots.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.generation = entry.generation.wrapping_add(1);
            entry.data = Some(data);
            (slot, entry.generation)
        } else {
            let slot = u32::try_from(self.slots.len()).map_err(|_| AllocError::OutOfMemory {
                requested: size,
                allocator: AllocatorKind::Heap,
            })?;
            self.slots.push(HeapSlot {
                generation: 0,
                data: Some(data),
            });
            (slot, 0)
        };

        self.live_blocks += 1;
        self.live_bytes += size;
        Ok(Block::new(Origin::Heap { slot, generation }, size))
    }

    fn reallocate(&mut self, block: Block, new_size: usize) -> AllocResult<Block> {
        let old_size = block.len();
        if new_size > old_size {
            self.check_budget(new_size - old_size)?;
        }

        let Origin::Heap { slot, .. } = block.origin else {
            return Err(AllocError::ForeignBlock(AllocatorKind::Heap));
        };
        let entry = self.slot_mut(&block)?;
        let old = entry.data.take().ok_or(AllocError::InvalidBlock)?;
        let mut data = vec![0u8; new_size].into_boxed_slice();
        copy_prefix(&old, &mut data);
        entry.data = Some(data);
        // The pre-resize handle must stop resolving
        entry.generation = entry.generation.wrapping_add(1);
        let generation = entry.generation;

        self.live_bytes = self.live_bytes - old_size + new_size;
        Ok(Block::new(Origin::Heap { slot, generation }, new_size))
    }

    fn free(&mut self, block: Block) -> AllocResult<()> {
        let Origin::Heap { slot, .. } = block.origin else {
            return Err(AllocError::ForeignBlock(AllocatorKind::Heap));
        };
        let entry = self.slot_mut(&block)?;
        if entry.data.take().is_none() {
            tracing::warn!("heap double free of slot {}", slot);
            return Err(AllocError::DoubleFree);
        }
        self.free_slots.push(slot);
        self.live_blocks -= 1;
        self.live_bytes -= block.len();
        Ok(())
    }

    fn bytes(&self, block: &Block) -> AllocResult<&[u8]> {
        self.slot(block)?
            .data
            .as_deref()
            .and_then(|data| data.get(..block.len()))
            .ok_or(AllocError::InvalidBlock)
    }

    fn bytes_mut(&mut self, block: &Block) -> AllocResult<&mut [u8]> {
        let len = block.len();
        self.slot_mut(block)?
            .data
            .as_deref_mut()
            .and_then(|data| data.get_mut(..len))
            .ok_or(AllocError::InvalidBlock)
    }

    fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            kind: AllocatorKind::Heap,
            live_blocks: self.live_blocks,
            live_bytes: self.live_bytes,
            blocks_num: 0,
            blocks_used: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_allocate_free() {
        let mut heap = HeapAllocator::new();

        let block = heap.allocate(32).unwrap();
        assert_eq!(block.len(), 32);
        assert_eq!(heap.live_blocks(), 1);
        assert_eq!(heap.live_bytes(), 32);

        heap.free(block).unwrap();
        assert_eq!(heap.live_blocks(), 0);
        assert_eq!(heap.live_bytes(), 0);
    }

    #[test]
    fn test_heap_double_free() {
        let mut heap = HeapAllocator::new();
        let block = heap.allocate(8).unwrap();
        heap.free(block).unwrap();
        assert_eq!(heap.free(block), Err(AllocError::DoubleFree));
    }

    #[test]
    fn test_heap_stale_handle_after_reuse() {
        let mut heap = HeapAllocator::new();
        let old = heap.allocate(8).unwrap();
        heap.free(old).unwrap();

        // Same slot, new generation
        let new = heap.allocate(8).unwrap();
        assert_eq!(heap.bytes(&old), Err(AllocError::InvalidBlock));
        assert!(heap.bytes(&new).is_ok());
    }

    #[test]
    fn test_heap_reallocate_keeps_prefix() {
        let mut heap = HeapAllocator::new();
        let block = heap.allocate(4).unwrap();
        heap.bytes_mut(&block).unwrap().copy_from_slice(&[1, 2, 3, 4]);

        let grown = heap.reallocate(block, 8).unwrap();
        assert_eq!(heap.bytes(&grown).unwrap(), &[1, 2, 3, 4, 0, 0, 0, 0]);
        assert_eq!(heap.bytes(&block), Err(AllocError::InvalidBlock));

        let shrunk = heap.reallocate(grown, 2).unwrap();
        assert_eq!(heap.bytes(&shrunk).unwrap(), &[1, 2]);
        assert_eq!(heap.live_bytes(), 2);
    }

    #[test]
    fn test_heap_reallocate_rejects_pre_resize_handle() {
        let mut heap = HeapAllocator::new();
        let big = heap.allocate(64).unwrap();
        let small = heap.reallocate(big, 8).unwrap();

        // The old, larger length must not be accounted against live bytes
        assert_eq!(heap.reallocate(big, 4), Err(AllocError::InvalidBlock));
        assert_eq!(heap.free(big), Err(AllocError::InvalidBlock));
        assert_eq!(heap.live_bytes(), 8);

        heap.free(small).unwrap();
        assert_eq!(heap.live_bytes(), 0);
    }

    #[test]
    fn test_heap_budget() {
        let mut heap = HeapAllocator::with_budget(16);
        let a = heap.allocate(10).unwrap();
        assert!(matches!(
            heap.allocate(10),
            Err(AllocError::OutOfMemory { requested: 10, .. })
        ));

        heap.free(a).unwrap();
        assert!(heap.allocate(10).is_ok());
    }
}
