//! # MIA Core
//!
//! Hierarchical object model with allocator-backed ownership:
//! - Every object has exactly one owner and dies with it
//! - Each root owns an allocator serving its whole subtree
//! - Weak references and deletion guards observe deletions
//!
//! ## Architecture Rules
//!
//! 1. **Handles, not pointers** - objects are addressed by generational [`ObjectId`]s
//! 2. **Owner-scoped memory** - allocations belong to an object and are freed with it
//! 3. **Single-threaded trees** - an [`ObjectTree`] never crosses threads
//!
//! ## Example
//!
//! ```rust
//! use mia_core::{ObjectTree, TypeTag, OBJECT};
//!
//! static TEXTURE: TypeTag = TypeTag::derive(&OBJECT, "Texture");
//!
//! let mut tree = ObjectTree::new();
//! let root = tree.create_root_heap().unwrap();
//!
//! let texture = tree.create_sized(root, 64, &TEXTURE).unwrap();
//! let pixels = tree.alloc_zeroed(texture, 4096).unwrap();
//! tree.mem_mut(texture, pixels).unwrap()[0] = 0xff;
//!
//! // Frees the texture and the pixel buffer
//! tree.delete(texture).unwrap();
//! ```
//!
//! A tree holds arbitrary payloads and stays on the thread that built it:
//!
//! ```compile_fail
//! fn assert_send<T: Send>() {}
//! assert_send::<mia_core::ObjectTree>();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod memory;
pub mod object;

pub use config::{AllocatorConfig, PoolConfig, RootConfig, TreeConfig};
pub use error::{AllocError, AllocResult, ObjResult, ObjectError};
pub use memory::{
    Allocator, AllocatorKind, AllocatorStats, ArenaAllocator, Block, HeapAllocator,
    PoolAllocator,
};
pub use object::{
    AsAny, DeleteCallback, DeleteContext, DeletionGuard, Descendants, Lifecycle, Object,
    ObjectId, ObjectTree, TypeTag, WeakRef, DELETION_GUARD, OBJECT, ROOT, WEAK_REF,
};
