//! # Managed Memory
//!
//! Allocations owned by an object, served by its root's allocator and
//! freed together with the object.

use bytemuck::Pod;

use super::id::ObjectId;
use super::tree::ObjectTree;
use crate::error::{AllocError, ObjResult, ObjectError};
use crate::memory::Block;

impl ObjectTree {
    /// Allocates `size` bytes owned by `obj`. The contents are unspecified.
    ///
    /// # Errors
    ///
    /// `StaleHandle` or the allocator error.
    pub fn alloc(&mut self, obj: ObjectId, size: usize) -> ObjResult<Block> {
        let root = self.node(obj)?.root;
        let block = self.allocator_mut(root)?.allocate(size)?;
        self.adopt(obj, root, block)
    }

    /// Allocates `size` zeroed bytes owned by `obj`.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectTree::alloc`].
    pub fn alloc_zeroed(&mut self, obj: ObjectId, size: usize) -> ObjResult<Block> {
        let root = self.node(obj)?.root;
        let block = self.allocator_mut(root)?.allocate_zeroed(size)?;
        self.adopt(obj, root, block)
    }

    /// Allocates a copy of `bytes` owned by `obj`.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectTree::alloc`].
    pub fn alloc_clone(&mut self, obj: ObjectId, bytes: &[u8]) -> ObjResult<Block> {
        let root = self.node(obj)?.root;
        let allocator = self.allocator_mut(root)?;
        let block = allocator.allocate(bytes.len())?;
        allocator.bytes_mut(&block)?.copy_from_slice(bytes);
        self.adopt(obj, root, block)
    }

    /// Allocates a copy of a plain-old-data value.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectTree::alloc`].
    pub fn alloc_pod<T: Pod>(&mut self, obj: ObjectId, value: &T) -> ObjResult<Block> {
        self.alloc_clone(obj, bytemuck::bytes_of(value))
    }

    fn adopt(&mut self, obj: ObjectId, root: ObjectId, block: Block) -> ObjResult<Block> {
        self.node_mut(obj)?.memory.push(block);
        self.mem_owners.insert((root, block), obj);
        Ok(block)
    }

    /// Resizes a block owned anywhere in the hierarchy of `obj`.
    ///
    /// The returned handle replaces `block`. On failure the old block is
    /// still owned and valid.
    ///
    /// # Errors
    ///
    /// `MemoryNotFound` if no object below `obj` owns the block, or the
    /// allocator error.
    pub fn realloc(&mut self, obj: ObjectId, block: Block, new_size: usize) -> ObjResult<Block> {
        let owner = self.owner_in(obj, block)?;
        let root = self.node(owner)?.root;
        let resized = self.allocator_mut(root)?.reallocate(block, new_size)?;

        let memory = &mut self.node_mut(owner)?.memory;
        if let Some(slot) = memory.iter_mut().rev().find(|b| **b == block) {
            *slot = resized;
        }
        self.mem_owners.remove(&(root, block));
        self.mem_owners.insert((root, resized), owner);
        Ok(resized)
    }

    /// Frees a block owned anywhere in the hierarchy of `obj`.
    ///
    /// # Errors
    ///
    /// `MemoryNotFound` if no object below `obj` owns the block, or the
    /// allocator error.
    pub fn free(&mut self, obj: ObjectId, block: Block) -> ObjResult<()> {
        let owner = self.owner_in(obj, block)?;
        let root = self.node(owner)?.root;

        let memory = &mut self.node_mut(owner)?.memory;
        if let Some(pos) = memory.iter().rposition(|b| *b == block) {
            memory.remove(pos);
        }
        self.mem_owners.remove(&(root, block));
        self.allocator_mut(root)?.free(block)?;
        Ok(())
    }

    /// Reads a block owned anywhere in the hierarchy of `obj`.
    ///
    /// # Errors
    ///
    /// `MemoryNotFound` if no object below `obj` owns the block.
    pub fn mem(&self, obj: ObjectId, block: Block) -> ObjResult<&[u8]> {
        let owner = self.owner_in(obj, block)?;
        let root = self.node(owner)?.root;
        Ok(self.allocator(root)?.bytes(&block)?)
    }

    /// Writes a block owned anywhere in the hierarchy of `obj`.
    ///
    /// # Errors
    ///
    /// `MemoryNotFound` if no object below `obj` owns the block.
    pub fn mem_mut(&mut self, obj: ObjectId, block: Block) -> ObjResult<&mut [u8]> {
        let owner = self.owner_in(obj, block)?;
        let root = self.node(owner)?.root;
        Ok(self.allocator_mut(root)?.bytes_mut(&block)?)
    }

    /// Reads a plain-old-data value from the start of a block.
    ///
    /// # Errors
    ///
    /// `InvalidBlock` if the block is smaller than `T`, otherwise same as
    /// [`ObjectTree::mem`].
    pub fn read_pod<T: Pod>(&self, obj: ObjectId, block: Block) -> ObjResult<T> {
        let bytes = self
            .mem(obj, block)?
            .get(..std::mem::size_of::<T>())
            .ok_or(AllocError::InvalidBlock)?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Writes a plain-old-data value to the start of a block.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectTree::read_pod`].
    pub fn write_pod<T: Pod>(&mut self, obj: ObjectId, block: Block, value: &T) -> ObjResult<()> {
        let src = bytemuck::bytes_of(value);
        self.mem_mut(obj, block)?
            .get_mut(..src.len())
            .ok_or(AllocError::InvalidBlock)?
            .copy_from_slice(src);
        Ok(())
    }

    /// Hands a block from the hierarchy of `obj` over to `into`.
    ///
    /// # Errors
    ///
    /// `MemoryNotFound` if no object below `obj` owns the block,
    /// `CrossRootMove` if `into` is served by another allocator.
    pub fn mem_move(&mut self, obj: ObjectId, into: ObjectId, block: Block) -> ObjResult<()> {
        let owner = self.owner_in(obj, block)?;
        let root = self.node(owner)?.root;
        if self.node(into)?.root != root {
            return Err(ObjectError::CrossRootMove { object: owner, into });
        }

        let memory = &mut self.node_mut(owner)?.memory;
        if let Some(pos) = memory.iter().rposition(|b| *b == block) {
            memory.remove(pos);
        }
        self.node_mut(into)?.memory.push(block);
        self.mem_owners.insert((root, block), into);
        Ok(())
    }

    /// Finds the object holding `block` directly, searching `obj` and up to
    /// `r_level` levels of its descendants (`<= 0` for `obj` alone).
    ///
    /// # Errors
    ///
    /// `StaleHandle` if `obj` is gone.
    pub fn mem_search_parent(
        &self,
        obj: ObjectId,
        block: Block,
        r_level: i32,
    ) -> ObjResult<Option<ObjectId>> {
        let root = self.node(obj)?.root;
        let max = usize::try_from(r_level).unwrap_or(0);
        Ok(self
            .mem_owners
            .get(&(root, block))
            .copied()
            .filter(|&owner| self.distance(obj, owner).is_some_and(|d| d <= max)))
    }

    /// Returns the number of managed allocations `obj` holds directly.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if `obj` is gone.
    pub fn mem_num(&self, obj: ObjectId) -> ObjResult<usize> {
        Ok(self.node(obj)?.memory.len())
    }

    fn owner_in(&self, obj: ObjectId, block: Block) -> ObjResult<ObjectId> {
        self.mem_search_parent(obj, block, i32::MAX)?
            .ok_or(ObjectError::MemoryNotFound)
    }
}

#[cfg(test)]
mod tests {
    use bytemuck::{Pod, Zeroable};

    use super::*;
    use crate::config::PoolConfig;
    use crate::object::Object;

    struct Holder;

    impl Object for Holder {}

    #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Vertex {
        pos: [f32; 3],
        color: u32,
    }

    fn tree() -> (ObjectTree, ObjectId, ObjectId) {
        let mut tree = ObjectTree::new();
        let root = tree.create_root_heap().unwrap();
        let obj = tree.create(root, Holder).unwrap();
        (tree, root, obj)
    }

    #[test]
    fn test_alloc_free() {
        let (mut tree, root, obj) = tree();
        let block = tree.alloc_zeroed(obj, 16).unwrap();
        assert_eq!(tree.mem_num(obj).unwrap(), 1);
        assert_eq!(tree.mem(obj, block).unwrap(), &[0; 16]);

        // Found from the root through the hierarchy
        tree.mem_mut(root, block).unwrap()[0] = 9;
        assert_eq!(tree.mem(obj, block).unwrap()[0], 9);

        tree.free(root, block).unwrap();
        assert_eq!(tree.mem_num(obj).unwrap(), 0);
        assert_eq!(tree.free(obj, block), Err(ObjectError::MemoryNotFound));
    }

    #[test]
    fn test_alloc_clone_and_realloc() {
        let (mut tree, _, obj) = tree();
        let block = tree.alloc_clone(obj, b"hello").unwrap();
        let grown = tree.realloc(obj, block, 8).unwrap();

        assert_eq!(&tree.mem(obj, grown).unwrap()[..5], b"hello");
        assert_eq!(tree.mem(obj, block), Err(ObjectError::MemoryNotFound));
        assert_eq!(tree.mem_num(obj).unwrap(), 1);
    }

    #[test]
    fn test_freed_arena_block_never_reaches_reused_bytes() {
        let mut tree = ObjectTree::new();
        let root = tree
            .create_root(Box::new(crate::memory::ArenaAllocator::new(1024)))
            .unwrap();

        let stale = tree.alloc_zeroed(root, 8).unwrap();
        tree.free(root, stale).unwrap();
        let fresh = tree.alloc_zeroed(root, 8).unwrap();
        tree.mem_mut(root, fresh).unwrap()[0] = 42;

        assert_ne!(stale, fresh);
        assert_eq!(tree.mem(root, stale), Err(ObjectError::MemoryNotFound));
        assert!(tree.mem_mut(root, stale).is_err());
        assert_eq!(tree.free(root, stale), Err(ObjectError::MemoryNotFound));
        assert_eq!(tree.mem(root, fresh).unwrap()[0], 42);
    }

    #[test]
    fn test_memory_outside_hierarchy_not_found() {
        let (mut tree, root, obj) = tree();
        let sibling = tree.create(root, Holder).unwrap();
        let block = tree.alloc(obj, 4).unwrap();

        assert_eq!(tree.mem(sibling, block), Err(ObjectError::MemoryNotFound));
        assert_eq!(tree.mem_search_parent(root, block, 0).unwrap(), None);
        assert_eq!(tree.mem_search_parent(root, block, 1).unwrap(), Some(obj));
        assert_eq!(tree.mem_search_parent(obj, block, -5).unwrap(), Some(obj));
    }

    #[test]
    fn test_mem_move() {
        let (mut tree, root, obj) = tree();
        let other = tree.create(root, Holder).unwrap();
        let block = tree.alloc(obj, 4).unwrap();

        tree.mem_move(obj, other, block).unwrap();
        assert_eq!(tree.mem_num(obj).unwrap(), 0);
        assert_eq!(tree.mem_num(other).unwrap(), 1);

        // The block now lives and dies with `other`
        tree.delete(obj).unwrap();
        assert!(tree.mem(other, block).is_ok());
        tree.delete(other).unwrap();
        assert_eq!(tree.mem(root, block), Err(ObjectError::MemoryNotFound));
    }

    #[test]
    fn test_mem_move_across_roots_rejected() {
        let (mut tree, _, obj) = tree();
        let pool = tree.create_root_pool(PoolConfig::new(32, 4, 1)).unwrap();
        let block = tree.alloc(obj, 4).unwrap();

        assert_eq!(
            tree.mem_move(obj, pool, block),
            Err(ObjectError::CrossRootMove { object: obj, into: pool })
        );
    }

    #[test]
    fn test_pod_roundtrip() {
        let (mut tree, _, obj) = tree();
        let vertex = Vertex {
            pos: [1.0, 2.0, 3.0],
            color: 0xff00_ff00,
        };
        let block = tree.alloc_pod(obj, &vertex).unwrap();
        assert_eq!(tree.read_pod::<Vertex>(obj, block).unwrap(), vertex);

        tree.write_pod(obj, block, &Vertex::zeroed()).unwrap();
        assert_eq!(tree.read_pod::<Vertex>(obj, block).unwrap(), Vertex::zeroed());

        // Too small for the type
        let small = tree.alloc(obj, 2).unwrap();
        assert!(tree.read_pod::<u32>(obj, small).is_err());
    }
}
