//! # Pool Allocator
//!
//! Fixed-size block allocator for the many small objects of a tree.

use super::allocator::{copy_prefix, Allocator, AllocatorKind, AllocatorStats, Block, Origin};
use super::heap::HeapAllocator;
use crate::config::PoolConfig;
use crate::error::{AllocError, AllocResult};

/// A pool allocator handing out blocks of `block_size` bytes.
///
/// Blocks live in pools of `blocks_in_pool` blocks each. When every block is
/// taken a new pool is appended, unless `max_pools` is reached. Requests
/// larger than a block go to an internal heap allocator.
///
/// Freed blocks are pushed back on a free stack and reused by the next
/// allocation, so create/delete churn never grows the pool.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. It belongs to exactly one tree root.
///
/// # Example
///
/// ```rust
/// use mia_core::config::PoolConfig;
/// use mia_core::memory::{Allocator, PoolAllocator};
///
/// let mut pool = PoolAllocator::new(PoolConfig::new(64, 16, 1));
///
/// let handle = pool.allocate(48).unwrap();
/// assert_eq!(pool.blocks_used(), 1);
///
/// pool.free(handle).unwrap();
/// assert_eq!(pool.blocks_used(), 0);
/// ```
pub struct PoolAllocator {
    /// Backing storage, one boxed region per pool.
    pools: Vec<Box<[u8]>>,
    /// Free stack - global indices of available blocks.
    free_stack: Vec<u32>,
    /// Per-block generation, bumped on every allocation of that block.
    generations: Vec<u32>,
    /// Per-block usage flag, for double free detection.
    in_use: Vec<bool>,
    /// Oversized requests.
    overflow: HeapAllocator,
    block_size: usize,
    blocks_in_pool: usize,
    max_pools: Option<usize>,
    blocks_used: usize,
    pooled_bytes: usize,
}

impl PoolAllocator {
    /// Creates a pool allocator, reserving `start_pools` pools upfront.
    ///
    /// Zero values in `config` fall back to the defaults of [`PoolConfig`].
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let config = config.normalized();

        let mut pool = Self {
            pools: Vec::with_capacity(config.start_pools),
            free_stack: Vec::new(),
            generations: Vec::new(),
            in_use: Vec::new(),
            overflow: HeapAllocator::new(),
            block_size: config.block_size,
            blocks_in_pool: config.blocks_in_pool,
            max_pools: config.max_pools,
            blocks_used: 0,
            pooled_bytes: 0,
        };
        for _ in 0..config.start_pools {
            pool.add_pool();
        }

        tracing::trace!(
            "created {} pools with {} blocks and {} block_size",
            pool.pools.len(),
            pool.blocks_in_pool,
            pool.block_size
        );
        pool
    }

    /// Returns the maximal size of a pooled allocation.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the number of blocks in a single pool.
    #[inline]
    #[must_use]
    pub const fn blocks_in_pool(&self) -> usize {
        self.blocks_in_pool
    }

    /// Returns the number of pools reserved so far.
    #[inline]
    #[must_use]
    pub fn pools_num(&self) -> usize {
        self.pools.len()
    }

    /// Returns the total number of pooled blocks.
    #[inline]
    #[must_use]
    pub fn blocks_num(&self) -> usize {
        self.pools.len() * self.blocks_in_pool
    }

    /// Returns the number of pooled blocks in use.
    #[inline]
    #[must_use]
    pub const fn blocks_used(&self) -> usize {
        self.blocks_used
    }

    /// Returns the number of pooled blocks ready for reuse.
    #[inline]
    #[must_use]
    pub fn blocks_available(&self) -> usize {
        self.free_stack.len()
    }

    /// Returns true if the block was served from a pool (not the heap fallback).
    #[inline]
    #[must_use]
    pub fn is_pooled(&self, block: &Block) -> bool {
        matches!(block.origin, Origin::Pool { .. })
    }

    fn add_pool(&mut self) {
        let first = self.blocks_num();
        self.pools
            .push(vec![0u8; self.block_size * self.blocks_in_pool].into_boxed_slice());
        self.generations.resize(first + self.blocks_in_pool, 0);
        self.in_use.resize(first + self.blocks_in_pool, false);

        // Reversed so blocks are handed out in address order
        #[allow(clippy::cast_possible_truncation)]
        self.free_stack
            .extend((first..first + self.blocks_in_pool).rev().map(|i| i as u32));
    }

    fn pop_block(&mut self, requested: usize) -> AllocResult<u32> {
        if self.free_stack.is_empty() {
            let limit_reached = self.max_pools.is_some_and(|max| self.pools.len() >= max);
            let index_overflow = self.blocks_num() + self.blocks_in_pool > u32::MAX as usize;
            if limit_reached || index_overflow {
                tracing::debug!(
                    "pool exhausted: {} pools of {} blocks all in use",
                    self.pools.len(),
                    self.blocks_in_pool
                );
                return Err(AllocError::OutOfMemory {
                    requested,
                    allocator: AllocatorKind::Pool,
                });
            }
            self.add_pool();
            tracing::trace!("allocating a new pool! (pools now: {})", self.pools.len());
        }
        self.free_stack.pop().ok_or(AllocError::OutOfMemory {
            requested,
            allocator: AllocatorKind::Pool,
        })
    }

    /// Validates a pooled handle and returns its global block index.
    fn live_index(&self, block: &Block) -> AllocResult<usize> {
        let Origin::Pool { slot, generation } = block.origin else {
            return Err(AllocError::ForeignBlock(AllocatorKind::Pool));
        };
        let index = slot as usize;
        if self.generations.get(index) != Some(&generation) {
            return Err(AllocError::InvalidBlock);
        }
        if !self.in_use[index] {
            return Err(AllocError::DoubleFree);
        }
        Ok(index)
    }

    fn range(&self, index: usize, len: usize) -> (usize, std::ops::Range<usize>) {
        let pool = index / self.blocks_in_pool;
        let start = (index % self.blocks_in_pool) * self.block_size;
        (pool, start..start + len)
    }

    fn release(&mut self, index: usize, len: usize) {
        self.in_use[index] = false;
        #[allow(clippy::cast_possible_truncation)]
        self.free_stack.push(index as u32);
        self.blocks_used -= 1;
        self.pooled_bytes -= len;
    }
}

impl Allocator for PoolAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Pool
    }

    fn allocate(&mut self, size: usize) -> AllocResult<Block> {
        if size > self.block_size {
            return self.overflow.allocate(size);
        }

        let slot = self.pop_block(size)?;
        let index = slot as usize;
        let generation = self.generations[index].wrapping_add(1);
        self.generations[index] = generation;
        self.in_use[index] = true;
        self.blocks_used += 1;
        self.pooled_bytes += size;

        Ok(Block::new(Origin::Pool { slot, generation }, size))
    }

    fn reallocate(&mut self, block: Block, new_size: usize) -> AllocResult<Block> {
        if matches!(block.origin, Origin::Heap { .. }) {
            return self.overflow.reallocate(block, new_size);
        }

        let index = self.live_index(&block)?;
        let old_size = block.len();

        if new_size <= self.block_size {
            // The block already has room, only the visible length changes
            if new_size > old_size {
                let (pool, range) = self.range(index, new_size);
                self.pools[pool][range.start + old_size..range.end].fill(0);
            }
            self.pooled_bytes = self.pooled_bytes - old_size + new_size;
            let generation = self.generations[index].wrapping_add(1);
            self.generations[index] = generation;
            #[allow(clippy::cast_possible_truncation)]
            let slot = index as u32;
            return Ok(Block::new(Origin::Pool { slot, generation }, new_size));
        }

        // Outgrew the block: move the bytes to the heap, give the block back
        let moved = self.overflow.allocate(new_size)?;
        let (pool, range) = self.range(index, old_size);
        copy_prefix(&self.pools[pool][range], self.overflow.bytes_mut(&moved)?);
        self.release(index, old_size);
        Ok(moved)
    }

    fn free(&mut self, block: Block) -> AllocResult<()> {
        if matches!(block.origin, Origin::Heap { .. }) {
            return self.overflow.free(block);
        }

        match self.live_index(&block) {
            Ok(index) => {
                self.release(index, block.len());
                Ok(())
            }
            Err(AllocError::DoubleFree) => {
                tracing::warn!("free failed, already free or another double free bug!");
                Err(AllocError::DoubleFree)
            }
            Err(err) => Err(err),
        }
    }

    fn bytes(&self, block: &Block) -> AllocResult<&[u8]> {
        if matches!(block.origin, Origin::Heap { .. }) {
            return self.overflow.bytes(block);
        }
        let index = self.live_index(block).map_err(|_| AllocError::InvalidBlock)?;
        let (pool, range) = self.range(index, block.len());
        Ok(&self.pools[pool][range])
    }

    fn bytes_mut(&mut self, block: &Block) -> AllocResult<&mut [u8]> {
        if matches!(block.origin, Origin::Heap { .. }) {
            return self.overflow.bytes_mut(block);
        }
        let index = self.live_index(block).map_err(|_| AllocError::InvalidBlock)?;
        let (pool, range) = self.range(index, block.len());
        Ok(&mut self.pools[pool][range])
    }

    fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            kind: AllocatorKind::Pool,
            live_blocks: self.blocks_used + self.overflow.live_blocks(),
            live_bytes: self.pooled_bytes + self.overflow.live_bytes(),
            blocks_num: self.blocks_num(),
            blocks_used: self.blocks_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool(blocks: usize, max_pools: Option<usize>) -> PoolAllocator {
        PoolAllocator::new(PoolConfig {
            block_size: 32,
            blocks_in_pool: blocks,
            start_pools: 1,
            max_pools,
        })
    }

    #[test]
    fn test_pool_allocate_free() {
        let mut pool = small_pool(10, None);

        let h1 = pool.allocate(16).unwrap();
        pool.bytes_mut(&h1).unwrap()[0] = 42;
        assert_eq!(pool.bytes(&h1).unwrap()[0], 42);
        assert_eq!(pool.blocks_used(), 1);

        pool.free(h1).unwrap();
        assert_eq!(pool.blocks_used(), 0);
        assert_eq!(pool.blocks_available(), 10);
    }

    #[test]
    fn test_pool_full() {
        let mut pool = small_pool(2, Some(1));

        let _ = pool.allocate(1).unwrap();
        let _ = pool.allocate(2).unwrap();
        assert!(matches!(
            pool.allocate(3),
            Err(AllocError::OutOfMemory { allocator: AllocatorKind::Pool, .. })
        ));
    }

    #[test]
    fn test_pool_grows_new_pool() {
        let mut pool = small_pool(2, None);

        for _ in 0..3 {
            pool.allocate(8).unwrap();
        }
        assert_eq!(pool.pools_num(), 2);
        assert_eq!(pool.blocks_num(), 4);
        assert_eq!(pool.blocks_used(), 3);
    }

    #[test]
    fn test_pool_reuse() {
        let mut pool = small_pool(1, Some(1));

        let h1 = pool.allocate(4).unwrap();
        pool.free(h1).unwrap();

        let h2 = pool.allocate(4).unwrap();
        assert_ne!(h1, h2); // Same block, new generation
        assert_eq!(pool.bytes(&h1), Err(AllocError::InvalidBlock));
        assert!(pool.bytes(&h2).is_ok());
    }

    #[test]
    fn test_pool_double_free() {
        let mut pool = small_pool(4, None);
        let h = pool.allocate(4).unwrap();
        pool.free(h).unwrap();
        assert_eq!(pool.free(h), Err(AllocError::DoubleFree));
        assert_eq!(pool.blocks_used(), 0);
    }

    #[test]
    fn test_pool_oversize_falls_back_to_heap() {
        let mut pool = small_pool(4, Some(1));

        let big = pool.allocate(100).unwrap();
        assert!(!pool.is_pooled(&big));
        assert_eq!(pool.blocks_used(), 0);
        assert_eq!(pool.stats().live_blocks, 1);

        pool.free(big).unwrap();
        assert_eq!(pool.stats().live_blocks, 0);
    }

    #[test]
    fn test_pool_reallocate_within_and_beyond_block() {
        let mut pool = small_pool(4, None);

        let block = pool.allocate(4).unwrap();
        pool.bytes_mut(&block).unwrap().copy_from_slice(&[9, 8, 7, 6]);

        let within = pool.reallocate(block, 16).unwrap();
        assert!(pool.is_pooled(&within));
        assert_eq!(&pool.bytes(&within).unwrap()[..6], &[9, 8, 7, 6, 0, 0]);
        assert_eq!(pool.bytes(&block), Err(AllocError::InvalidBlock));
        assert_eq!(pool.free(block), Err(AllocError::InvalidBlock));

        let beyond = pool.reallocate(within, 64).unwrap();
        assert!(!pool.is_pooled(&beyond));
        assert_eq!(&pool.bytes(&beyond).unwrap()[..4], &[9, 8, 7, 6]);
        assert_eq!(pool.blocks_used(), 0);
    }
}
