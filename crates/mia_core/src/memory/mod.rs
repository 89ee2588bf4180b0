//! # Memory Management
//!
//! Allocators owned by tree roots. Every object in a root's subtree draws
//! its memory from the root's allocator and returns it on deletion.
//!
//! ## Allocator kinds
//!
//! - [`HeapAllocator`] - one buffer per block, optional byte budget
//! - [`PoolAllocator`] - fixed-size blocks in pre-allocated pools, oversized
//!   requests fall back to the heap
//! - [`ArenaAllocator`] - bump region, only the newest block can be freed

mod allocator;
mod arena;
mod heap;
mod pool;

pub use allocator::{Allocator, AllocatorKind, AllocatorStats, Block};
pub use arena::ArenaAllocator;
pub use heap::HeapAllocator;
pub use pool::PoolAllocator;
