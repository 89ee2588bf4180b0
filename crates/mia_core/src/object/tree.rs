//! # Object Tree
//!
//! Slot arena holding every object of every root, plus the deletion walk.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;

use super::id::ObjectId;
use super::type_tag::{TypeTag, OBJECT};
use super::weak::WeakRef;
use super::{Blank, DeleteContext, Lifecycle, Object};
use crate::config::{AllocatorConfig, PoolConfig, TreeConfig};
use crate::error::{ObjResult, ObjectError};
use crate::memory::{Allocator, AllocatorStats, Block, HeapAllocator, PoolAllocator};

/// Type of every root object.
pub static ROOT: TypeTag = TypeTag::derive(&OBJECT, "Root");

/// One live object.
pub(super) struct Node {
    pub(super) parent: Option<ObjectId>,
    /// The root whose allocator serves this object (itself for roots).
    pub(super) root: ObjectId,
    pub(super) children: Vec<ObjectId>,
    pub(super) tag: &'static TypeTag,
    pub(super) name: Option<String>,
    pub(super) user_data: Option<Box<dyn Any>>,
    /// Weak references currently pointing at this object.
    pub(super) watchers: Vec<ObjectId>,
    /// The object's own block.
    pub(super) block: Block,
    /// Managed allocations, freed with the object.
    pub(super) memory: Vec<Block>,
    /// Only roots own an allocator.
    pub(super) allocator: Option<Box<dyn Allocator>>,
    pub(super) payload: Box<dyn Object>,
    pub(super) state: Lifecycle,
}

impl Node {
    fn new(
        parent: Option<ObjectId>,
        root: ObjectId,
        payload: Box<dyn Object>,
        block: Block,
    ) -> Self {
        Self {
            parent,
            root,
            children: Vec::new(),
            tag: payload.type_tag(),
            name: None,
            user_data: None,
            watchers: Vec::new(),
            block,
            memory: Vec::new(),
            allocator: None,
            payload,
            state: Lifecycle::Constructed,
        }
    }

    pub(super) fn payload_any(&self) -> &dyn Any {
        (*self.payload).as_any()
    }

    pub(super) fn payload_any_mut(&mut self) -> &mut dyn Any {
        (*self.payload).as_any_mut()
    }
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Step of the iterative teardown.
enum Visit {
    /// Run the deletor, then schedule the children.
    Enter(ObjectId),
    /// Every child is gone: unlink and free.
    Exit(ObjectId),
}

/// Container of all objects, grouped into independent roots.
///
/// Each root owns one [`Allocator`]; every object below it charges its
/// block and its managed allocations against that allocator. Deleting an
/// object deletes its whole subtree, deleting a root drops its allocator
/// in one go.
///
/// The tree is single-threaded: payloads are arbitrary `dyn Object`s, so
/// it is neither `Send` nor `Sync`.
///
/// # Example
///
/// ```rust
/// use mia_core::{Object, ObjectTree};
///
/// struct Counter(u64);
/// impl Object for Counter {}
///
/// let mut tree = ObjectTree::new();
/// let root = tree.create_root_heap().unwrap();
///
/// let a = tree.create(root, Counter(0)).unwrap();
/// let b = tree.create(a, Counter(1)).unwrap();
/// assert_eq!(tree.parent(b).unwrap(), Some(a));
///
/// // Deleting `a` takes `b` with it
/// assert_eq!(tree.delete(a).unwrap(), 2);
/// assert!(!tree.contains(b));
/// ```
pub struct ObjectTree {
    slots: Vec<Slot>,
    /// Free list of slot indices for reuse.
    free_slots: Vec<u32>,
    live: usize,
    roots: Vec<ObjectId>,
    /// Owner of every managed allocation, keyed by root and block.
    pub(super) mem_owners: HashMap<(ObjectId, Block), ObjectId>,
}

impl ObjectTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty tree with room for `capacity` objects.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_slots: Vec::new(),
            live: 0,
            roots: Vec::new(),
            mem_owners: HashMap::new(),
        }
    }

    /// Builds a tree and its named roots from config.
    ///
    /// # Errors
    ///
    /// [`ObjectError::InvalidConfig`] if the config does not validate, or the
    /// allocator error of a root that could not be created.
    pub fn from_config(config: &TreeConfig) -> ObjResult<Self> {
        config.validate()?;
        let mut tree = Self::with_capacity(config.initial_capacity);
        for root in &config.roots {
            let id = tree.create_root_from_config(&root.allocator)?;
            tree.set_name(id, Some(&root.name))?;
        }
        Ok(tree)
    }

    /// Returns the number of live objects, roots included.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    /// Returns true if the tree holds no objects.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Returns the live roots in creation order.
    #[must_use]
    pub fn roots(&self) -> &[ObjectId] {
        &self.roots
    }

    /// Returns the first root with the given name.
    #[must_use]
    pub fn root_named(&self, name: &str) -> Option<ObjectId> {
        self.roots
            .iter()
            .copied()
            .find(|&root| matches!(self.name(root), Ok(Some(n)) if n == name))
    }

    /// Checks if a handle refers to a live object.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.node(id).is_ok()
    }

    // =========================================================================
    // Slots
    // =========================================================================

    pub(super) fn node(&self, id: ObjectId) -> ObjResult<&Node> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
            .ok_or(ObjectError::StaleHandle(id))
    }

    pub(super) fn node_mut(&mut self, id: ObjectId) -> ObjResult<&mut Node> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_mut())
            .ok_or(ObjectError::StaleHandle(id))
    }

    fn insert(&mut self, node: Node) -> ObjectId {
        self.live += 1;

        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            // Increment generation to invalidate old handles
            slot.generation = slot.generation.wrapping_add(1);
            slot.node = Some(node);
            return ObjectId::new(index, slot.generation);
        }

        #[allow(clippy::cast_possible_truncation)]
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        ObjectId::new(index, 0)
    }

    pub(super) fn allocator(&self, root: ObjectId) -> ObjResult<&dyn Allocator> {
        self.node(root)?
            .allocator
            .as_deref()
            .ok_or(ObjectError::StaleHandle(root))
    }

    pub(super) fn allocator_mut(
        &mut self,
        root: ObjectId,
    ) -> ObjResult<&mut (dyn Allocator + 'static)> {
        self.node_mut(root)?
            .allocator
            .as_deref_mut()
            .ok_or(ObjectError::StaleHandle(root))
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Creates a root owning `allocator`.
    ///
    /// # Errors
    ///
    /// The allocator error if it cannot provide the root's own block.
    pub fn create_root(&mut self, mut allocator: Box<dyn Allocator>) -> ObjResult<ObjectId> {
        let block = allocator.allocate_zeroed(0)?;
        let kind = allocator.kind();

        let mut node = Node::new(None, ObjectId::NULL, Box::new(Blank { tag: &ROOT }), block);
        node.allocator = Some(allocator);
        let id = self.insert(node);
        self.node_mut(id)?.root = id;
        self.roots.push(id);

        tracing::trace!("created root {} with {} allocator", id, kind);
        Ok(id)
    }

    /// Creates a root backed by a [`HeapAllocator`].
    ///
    /// # Errors
    ///
    /// Same as [`ObjectTree::create_root`].
    pub fn create_root_heap(&mut self) -> ObjResult<ObjectId> {
        self.create_root(Box::new(HeapAllocator::new()))
    }

    /// Creates a root backed by a [`PoolAllocator`].
    ///
    /// # Errors
    ///
    /// Same as [`ObjectTree::create_root`].
    pub fn create_root_pool(&mut self, config: PoolConfig) -> ObjResult<ObjectId> {
        self.create_root(Box::new(PoolAllocator::new(config)))
    }

    /// Creates a root backed by the allocator `config` describes.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectTree::create_root`].
    pub fn create_root_from_config(&mut self, config: &AllocatorConfig) -> ObjResult<ObjectId> {
        self.create_root(config.build())
    }

    /// Creates an object owned by `parent`.
    ///
    /// The root allocator is charged a zeroed block of `size_of::<T>()`
    /// bytes for it.
    ///
    /// # Errors
    ///
    /// `StaleHandle` for a dead parent, `ParentDeleting` while the parent is
    /// torn down, or the allocator error.
    pub fn create<T: Object>(&mut self, parent: ObjectId, value: T) -> ObjResult<ObjectId> {
        self.attach(parent, Box::new(value), std::mem::size_of::<T>())
    }

    /// Creates an untyped object of `size` zeroed bytes, tagged `tag`.
    ///
    /// The bytes are reached with [`ObjectTree::object_bytes`].
    ///
    /// # Errors
    ///
    /// Same as [`ObjectTree::create`].
    pub fn create_sized(
        &mut self,
        parent: ObjectId,
        size: usize,
        tag: &'static TypeTag,
    ) -> ObjResult<ObjectId> {
        self.attach(parent, Box::new(Blank { tag }), size)
    }

    fn attach(
        &mut self,
        parent: ObjectId,
        payload: Box<dyn Object>,
        size: usize,
    ) -> ObjResult<ObjectId> {
        let parent_node = self.node(parent)?;
        if parent_node.state != Lifecycle::Constructed {
            return Err(ObjectError::ParentDeleting(parent));
        }
        let root = parent_node.root;

        let block = self.allocator_mut(root)?.allocate_zeroed(size)?;
        let id = self.insert(Node::new(Some(parent), root, payload, block));
        self.node_mut(parent)?.children.push(id);

        tracing::trace!("created {} under {}", id, parent);
        Ok(id)
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Deletes an object and its whole subtree, returning how many objects
    /// were freed.
    ///
    /// For every object, depth-first:
    /// 1. its [`Object::on_delete`] runs
    /// 2. its children are deleted in order
    /// 3. weak references to it are cleared
    /// 4. it is removed from its parent
    /// 5. its memory is freed and its payload dropped
    ///
    /// Deleting a root skips the per-object frees and drops the root's
    /// allocator at the end instead.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is already gone.
    ///
    /// # Panics
    ///
    /// Panics if a deletion guard in the subtree is an assert guard.
    pub fn delete(&mut self, obj: ObjectId) -> ObjResult<usize> {
        let node = self.node_mut(obj)?;
        if node.state != Lifecycle::Constructed {
            return Ok(0);
        }
        // Some only for roots
        let bulk = node.allocator.take();

        let mut stack = vec![Visit::Enter(obj)];
        let mut freed = 0;
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(id) => {
                    let children = self.run_deletor(id)?;
                    stack.push(Visit::Exit(id));
                    // Reversed so children are deleted first to last
                    stack.extend(children.into_iter().rev().map(Visit::Enter));
                }
                Visit::Exit(id) => {
                    self.release(id, bulk.is_some());
                    freed += 1;
                }
            }
        }

        if let Some(allocator) = bulk {
            self.roots.retain(|&root| root != obj);
            tracing::trace!(
                "deleted root {} ({} objects), dropping {} allocator",
                obj,
                freed,
                allocator.kind()
            );
        } else {
            tracing::trace!("deleted {} ({} objects)", obj, freed);
        }
        Ok(freed)
    }

    fn run_deletor(&mut self, id: ObjectId) -> ObjResult<Vec<ObjectId>> {
        let node = self.node_mut(id)?;
        node.state = Lifecycle::Deleting;
        let ctx = DeleteContext {
            id,
            name: node.name.as_deref(),
            tag: node.tag,
            user_data: node.user_data.as_deref(),
        };
        node.payload.on_delete(&ctx);
        node.state = Lifecycle::ChildrenDeleting;
        Ok(std::mem::take(&mut node.children))
    }

    fn release(&mut self, id: ObjectId, bulk: bool) {
        let Some(node) = self
            .slots
            .get_mut(id.index() as usize)
            .and_then(|slot| slot.node.take())
        else {
            return;
        };
        self.free_slots.push(id.index());
        self.live -= 1;

        for &weak in &node.watchers {
            self.clear_weak(weak, id);
        }
        if let Some(target) = node
            .payload_any()
            .downcast_ref::<WeakRef>()
            .and_then(WeakRef::target)
        {
            self.unwatch(target, id);
        }
        if let Some(parent) = node.parent {
            self.detach(parent, id);
        }

        for block in &node.memory {
            self.mem_owners.remove(&(node.root, *block));
        }
        if !bulk {
            if let Ok(allocator) = self.allocator_mut(node.root) {
                for block in node.memory.iter().copied().chain(Some(node.block)) {
                    if let Err(err) = allocator.free(block) {
                        tracing::warn!("failed to free memory of {}: {}", id, err);
                    }
                }
            }
        }
        // The payload drops with the node, after its children
    }

    fn detach(&mut self, parent: ObjectId, child: ObjectId) {
        if let Ok(node) = self.node_mut(parent) {
            if let Some(pos) = node.children.iter().rposition(|&c| c == child) {
                node.children.remove(pos);
            }
        }
    }

    // =========================================================================
    // Hierarchy
    // =========================================================================

    /// Returns the parent, `None` for roots.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is gone.
    pub fn parent(&self, obj: ObjectId) -> ObjResult<Option<ObjectId>> {
        Ok(self.node(obj)?.parent)
    }

    /// Returns the root the object lives under.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is gone.
    pub fn root_of(&self, obj: ObjectId) -> ObjResult<ObjectId> {
        Ok(self.node(obj)?.root)
    }

    /// Returns the children in insertion order.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is gone.
    pub fn children(&self, obj: ObjectId) -> ObjResult<&[ObjectId]> {
        Ok(&self.node(obj)?.children)
    }

    /// Returns the number of children.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is gone.
    pub fn children_num(&self, obj: ObjectId) -> ObjResult<usize> {
        Ok(self.node(obj)?.children.len())
    }

    /// Returns the direct children deriving from `filter` (all if `None`).
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is gone.
    pub fn list(&self, obj: ObjectId, filter: Option<&TypeTag>) -> ObjResult<Vec<ObjectId>> {
        Ok(self
            .node(obj)?
            .children
            .iter()
            .copied()
            .filter(|&child| filter.map_or(true, |tag| self.check_type(child, tag)))
            .collect())
    }

    /// Returns the lifecycle state, `None` once the object is freed.
    #[must_use]
    pub fn lifecycle(&self, obj: ObjectId) -> Option<Lifecycle> {
        self.node(obj).ok().map(|node| node.state)
    }

    /// Number of parent links from `obj` up to `ancestor`, 0 if they are the
    /// same object, `None` if `ancestor` is not above `obj`.
    pub(super) fn distance(&self, ancestor: ObjectId, obj: ObjectId) -> Option<usize> {
        let mut current = Some(obj);
        let mut steps = 0;
        while let Some(id) = current {
            if id == ancestor {
                return Some(steps);
            }
            current = self.node(id).ok().and_then(|node| node.parent);
            steps += 1;
        }
        None
    }

    /// Returns true if `ancestor` is a strict ancestor of `obj`.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: ObjectId, obj: ObjectId) -> bool {
        self.distance(ancestor, obj).is_some_and(|steps| steps > 0)
    }

    /// Moves `obj` (with its subtree) under `into`, appending it as the last
    /// child.
    ///
    /// # Errors
    ///
    /// - `RootNotMovable` if `obj` is a root
    /// - `CycleDetected` if `into` is `obj` or one of its descendants
    /// - `CrossRootMove` if `into` lives under another root
    /// - `StaleHandle` / `ParentDeleting` for unusable handles
    pub fn move_into(&mut self, obj: ObjectId, into: ObjectId) -> ObjResult<()> {
        let node = self.node(obj)?;
        let Some(old_parent) = node.parent else {
            return Err(ObjectError::RootNotMovable(obj));
        };
        let root = node.root;

        let target = self.node(into)?;
        if target.state != Lifecycle::Constructed {
            return Err(ObjectError::ParentDeleting(into));
        }
        let target_root = target.root;

        if self.distance(obj, into).is_some() {
            return Err(ObjectError::CycleDetected { object: obj, into });
        }
        if target_root != root {
            return Err(ObjectError::CrossRootMove { object: obj, into });
        }

        self.detach(old_parent, obj);
        self.node_mut(into)?.children.push(obj);
        self.node_mut(obj)?.parent = Some(into);

        tracing::trace!("moved {} from {} into {}", obj, old_parent, into);
        Ok(())
    }

    // =========================================================================
    // Types
    // =========================================================================

    /// Returns the object's type.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is gone.
    pub fn type_tag(&self, obj: ObjectId) -> ObjResult<&'static TypeTag> {
        Ok(self.node(obj)?.tag)
    }

    /// Returns true if the object is live and derives from `tag`.
    #[must_use]
    pub fn check_type(&self, obj: ObjectId, tag: &TypeTag) -> bool {
        self.node(obj).is_ok_and(|node| node.tag.is_a(tag))
    }

    /// Checks that the object derives from `tag`.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` naming both ids, or `StaleHandle`.
    pub fn expect_type(&self, obj: ObjectId, tag: &TypeTag) -> ObjResult<()> {
        let found = self.node(obj)?.tag;
        if found.is_a(tag) {
            Ok(())
        } else {
            Err(ObjectError::TypeMismatch {
                expected: tag.id(),
                found: found.id(),
            })
        }
    }

    /// Asserts that the object is live and derives from `tag`.
    ///
    /// # Panics
    ///
    /// Panics with both type ids on mismatch.
    #[track_caller]
    pub fn assert_type(&self, obj: ObjectId, tag: &TypeTag) {
        if let Err(err) = self.expect_type(obj, tag) {
            tracing::error!("type assertion failed for {}: {}", obj, err);
            panic!("type assertion failed for {obj}: {err}");
        }
    }

    /// Borrows the payload as `T`.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if the payload is not a `T`, or `StaleHandle`.
    pub fn get<T: Object>(&self, obj: ObjectId) -> ObjResult<&T> {
        let node = self.node(obj)?;
        node.payload_any()
            .downcast_ref::<T>()
            .ok_or_else(|| payload_mismatch::<T>(node.tag))
    }

    /// Mutably borrows the payload as `T`.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if the payload is not a `T`, or `StaleHandle`.
    pub fn get_mut<T: Object>(&mut self, obj: ObjectId) -> ObjResult<&mut T> {
        let node = self.node_mut(obj)?;
        let tag = node.tag;
        node.payload_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| payload_mismatch::<T>(tag))
    }

    // =========================================================================
    // Names and user data
    // =========================================================================

    /// Returns the optional name.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is gone.
    pub fn name(&self, obj: ObjectId) -> ObjResult<Option<&str>> {
        Ok(self.node(obj)?.name.as_deref())
    }

    /// Sets or clears the name.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is gone.
    pub fn set_name(&mut self, obj: ObjectId, name: Option<&str>) -> ObjResult<()> {
        self.node_mut(obj)?.name = name.map(str::to_owned);
        Ok(())
    }

    /// Attaches user data, returning the previous value.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is gone.
    pub fn set_user_data<T: Any>(
        &mut self,
        obj: ObjectId,
        data: T,
    ) -> ObjResult<Option<Box<dyn Any>>> {
        Ok(self.node_mut(obj)?.user_data.replace(Box::new(data)))
    }

    /// Returns the user data if it is a `T`.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is gone.
    pub fn user_data<T: Any>(&self, obj: ObjectId) -> ObjResult<Option<&T>> {
        Ok(self
            .node(obj)?
            .user_data
            .as_deref()
            .and_then(|data| data.downcast_ref::<T>()))
    }

    /// Mutable version of [`ObjectTree::user_data`].
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is gone.
    pub fn user_data_mut<T: Any>(&mut self, obj: ObjectId) -> ObjResult<Option<&mut T>> {
        Ok(self
            .node_mut(obj)?
            .user_data
            .as_deref_mut()
            .and_then(|data| data.downcast_mut::<T>()))
    }

    /// Detaches the user data.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is gone.
    pub fn take_user_data(&mut self, obj: ObjectId) -> ObjResult<Option<Box<dyn Any>>> {
        Ok(self.node_mut(obj)?.user_data.take())
    }

    // =========================================================================
    // Object block
    // =========================================================================

    /// Reads the object's own block.
    ///
    /// For [`ObjectTree::create_sized`] objects this is their data; typed
    /// objects get zeroed bytes the size of their payload.
    ///
    /// # Errors
    ///
    /// `StaleHandle`, or the allocator error for a dead block.
    pub fn object_bytes(&self, obj: ObjectId) -> ObjResult<&[u8]> {
        let node = self.node(obj)?;
        let block = node.block;
        Ok(self.allocator(node.root)?.bytes(&block)?)
    }

    /// Writes the object's own block.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectTree::object_bytes`].
    pub fn object_bytes_mut(&mut self, obj: ObjectId) -> ObjResult<&mut [u8]> {
        let node = self.node(obj)?;
        let (root, block) = (node.root, node.block);
        Ok(self.allocator_mut(root)?.bytes_mut(&block)?)
    }

    /// Returns the counters of the allocator serving `obj`.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the object is gone.
    pub fn allocator_stats(&self, obj: ObjectId) -> ObjResult<AllocatorStats> {
        let root = self.node(obj)?.root;
        Ok(self.allocator(root)?.stats())
    }
}

fn payload_mismatch<T>(found: &TypeTag) -> ObjectError {
    ObjectError::TypeMismatch {
        expected: type_name::<T>().to_owned(),
        found: found.id(),
    }
}

impl Default for ObjectTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTree")
            .field("len", &self.live)
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::memory::ArenaAllocator;

    static NODE: TypeTag = TypeTag::derive(&OBJECT, "Node");
    static NODE_LEAF: TypeTag = TypeTag::derive(&NODE, "Leaf");

    #[derive(Clone, Copy)]
    struct Value(u32);

    impl Object for Value {}

    impl<const N: usize> Object for [Value; N] {}

    #[allow(dead_code)]
    struct Bytes<const N: usize>([u8; N]);

    impl<const N: usize> Object for Bytes<N> {}

    type Log = Rc<RefCell<Vec<String>>>;

    struct Logged {
        label: &'static str,
        log: Log,
    }

    impl Object for Logged {
        fn type_tag(&self) -> &'static TypeTag {
            &NODE
        }

        fn on_delete(&mut self, _ctx: &DeleteContext<'_>) {
            self.log.borrow_mut().push(format!("{}.cleanup", self.label));
        }
    }

    impl Drop for Logged {
        fn drop(&mut self) {
            self.log.borrow_mut().push(format!("{}.drop", self.label));
        }
    }

    fn heap_tree() -> (ObjectTree, ObjectId) {
        let mut tree = ObjectTree::new();
        let root = tree.create_root_heap().unwrap();
        (tree, root)
    }

    #[test]
    fn test_create_and_lookup() {
        let (mut tree, root) = heap_tree();
        let a = tree.create(root, Value(5)).unwrap();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.parent(a).unwrap(), Some(root));
        assert_eq!(tree.root_of(a).unwrap(), root);
        assert_eq!(tree.children(root).unwrap(), &[a]);
        assert_eq!(tree.get::<Value>(a).unwrap().0, 5);
        assert_eq!(tree.object_bytes(a).unwrap(), &[0, 0, 0, 0]);
        assert_eq!(tree.lifecycle(a), Some(Lifecycle::Constructed));
        assert!(tree.type_tag(root).unwrap().is_a(&ROOT));
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let (mut tree, root) = heap_tree();
        let ids: Vec<_> = (0..5).map(|i| tree.create(root, Value(i)).unwrap()).collect();
        assert_eq!(tree.children(root).unwrap(), ids.as_slice());

        tree.delete(ids[2]).unwrap();
        assert_eq!(tree.children(root).unwrap(), &[ids[0], ids[1], ids[3], ids[4]]);
    }

    #[test]
    fn test_delete_order() {
        let (mut tree, root) = heap_tree();
        let log = Log::default();
        let a = tree
            .create(root, Logged { label: "a", log: log.clone() })
            .unwrap();
        tree.create(a, Logged { label: "b", log: log.clone() }).unwrap();
        tree.create(a, Logged { label: "c", log: log.clone() }).unwrap();

        assert_eq!(tree.delete(a).unwrap(), 3);
        assert_eq!(
            *log.borrow(),
            ["a.cleanup", "b.cleanup", "b.drop", "c.cleanup", "c.drop", "a.drop"]
        );
        assert_eq!(tree.len(), 1);
        assert!(tree.children(root).unwrap().is_empty());
    }

    #[test]
    fn test_stale_handle_after_delete() {
        let (mut tree, root) = heap_tree();
        let a = tree.create(root, Value(1)).unwrap();
        tree.delete(a).unwrap();

        assert_eq!(tree.parent(a), Err(ObjectError::StaleHandle(a)));
        assert_eq!(tree.lifecycle(a), None);

        // The slot is reused under a new generation
        let b = tree.create(root, Value(2)).unwrap();
        assert_eq!(b.index(), a.index());
        assert!(!tree.contains(a));
        assert_eq!(tree.delete(a), Err(ObjectError::StaleHandle(a)));
    }

    #[test]
    fn test_delete_frees_heap_blocks() {
        let (mut tree, root) = heap_tree();
        let baseline = tree.allocator_stats(root).unwrap();

        let a = tree.create(root, [Value(0); 64]).unwrap();
        tree.create(a, [Value(0); 32]).unwrap();
        tree.alloc(a, 100).unwrap();
        assert_eq!(tree.allocator_stats(root).unwrap().live_blocks, baseline.live_blocks + 3);

        tree.delete(a).unwrap();
        assert_eq!(tree.allocator_stats(root).unwrap(), baseline);
    }

    #[test]
    fn test_delete_root_drops_everything() {
        let mut tree = ObjectTree::new();
        let root = tree
            .create_root(Box::new(ArenaAllocator::new(1024)))
            .unwrap();
        let log = Log::default();
        let a = tree
            .create(root, Logged { label: "a", log: log.clone() })
            .unwrap();
        tree.create(a, Logged { label: "b", log: log.clone() }).unwrap();

        assert_eq!(tree.delete(root).unwrap(), 3);
        assert!(tree.is_empty());
        assert!(tree.roots().is_empty());
        assert_eq!(*log.borrow(), ["a.cleanup", "b.cleanup", "b.drop", "a.drop"]);
    }

    #[test]
    fn test_move_into() {
        let (mut tree, root) = heap_tree();
        let a = tree.create(root, Value(0)).unwrap();
        let b = tree.create(root, Value(0)).unwrap();
        let c = tree.create(a, Value(0)).unwrap();

        tree.move_into(c, b).unwrap();
        assert_eq!(tree.parent(c).unwrap(), Some(b));
        assert!(tree.children(a).unwrap().is_empty());
        assert_eq!(tree.children(b).unwrap(), &[c]);

        // c now dies with b
        tree.delete(b).unwrap();
        assert!(!tree.contains(c));
        assert!(tree.contains(a));
    }

    #[test]
    fn test_move_rejects_cycles_and_roots() {
        let (mut tree, root) = heap_tree();
        let a = tree.create(root, Value(0)).unwrap();
        let b = tree.create(a, Value(0)).unwrap();

        assert_eq!(
            tree.move_into(a, b),
            Err(ObjectError::CycleDetected { object: a, into: b })
        );
        assert_eq!(
            tree.move_into(a, a),
            Err(ObjectError::CycleDetected { object: a, into: a })
        );
        assert_eq!(tree.move_into(root, a), Err(ObjectError::RootNotMovable(root)));
    }

    #[test]
    fn test_move_across_roots_rejected() {
        let mut tree = ObjectTree::new();
        let heap = tree.create_root_heap().unwrap();
        let pool = tree.create_root_pool(PoolConfig::new(64, 8, 1)).unwrap();
        let a = tree.create(heap, Value(0)).unwrap();
        let b = tree.create(pool, Value(0)).unwrap();

        assert_eq!(
            tree.move_into(a, b),
            Err(ObjectError::CrossRootMove { object: a, into: b })
        );
        assert_eq!(tree.parent(a).unwrap(), Some(heap));
    }

    #[test]
    fn test_type_checks() {
        let (mut tree, root) = heap_tree();
        let leaf = tree.create_sized(root, 8, &NODE_LEAF).unwrap();

        assert!(tree.check_type(leaf, &NODE));
        assert!(tree.check_type(leaf, &OBJECT));
        assert!(!tree.check_type(root, &NODE));
        tree.assert_type(leaf, &NODE);

        let err = tree.expect_type(root, &NODE_LEAF).unwrap_err();
        assert_eq!(
            err,
            ObjectError::TypeMismatch {
                expected: "ObjNodeLeaf".into(),
                found: "ObjRoot".into(),
            }
        );
    }

    #[test]
    #[should_panic(expected = "type assertion failed")]
    fn test_assert_type_panics_on_sibling() {
        let (mut tree, root) = heap_tree();
        let leaf = tree.create_sized(root, 0, &NODE_LEAF).unwrap();
        tree.assert_type(leaf, &ROOT);
    }

    #[test]
    fn test_get_wrong_type() {
        let (mut tree, root) = heap_tree();
        let a = tree.create(root, Value(1)).unwrap();
        assert!(matches!(
            tree.get::<Bytes<4>>(a),
            Err(ObjectError::TypeMismatch { .. })
        ));
        tree.get_mut::<Value>(a).unwrap().0 += 1;
        assert_eq!(tree.get::<Value>(a).unwrap().0, 2);
    }

    #[test]
    fn test_list_filters_by_type() {
        let (mut tree, root) = heap_tree();
        let plain = tree.create(root, Value(0)).unwrap();
        let leaf = tree.create_sized(root, 0, &NODE_LEAF).unwrap();

        assert_eq!(tree.list(root, None).unwrap(), vec![plain, leaf]);
        assert_eq!(tree.list(root, Some(&NODE)).unwrap(), vec![leaf]);
        assert!(tree.list(leaf, None).unwrap().is_empty());
    }

    #[test]
    fn test_type_checks_match_id_prefix() {
        static NOD: TypeTag = TypeTag::derive(&OBJECT, "Nod");

        let (mut tree, root) = heap_tree();
        let node = tree.create_sized(root, 0, &NODE).unwrap();
        let plain = tree.create(root, Value(0)).unwrap();

        assert!(tree.check_type(node, &NOD));
        assert!(tree.expect_type(node, &NOD).is_ok());
        tree.assert_type(node, &NOD);
        assert!(!tree.check_type(plain, &NOD));
        assert_eq!(tree.list(root, Some(&NOD)).unwrap(), vec![node]);
        assert_eq!(tree.find(root, &NOD, None, 1).unwrap(), Some(node));
    }

    #[test]
    fn test_names_and_user_data() {
        let (mut tree, root) = heap_tree();
        let a = tree.create(root, Value(0)).unwrap();

        assert_eq!(tree.name(a).unwrap(), None);
        tree.set_name(a, Some("alpha")).unwrap();
        assert_eq!(tree.name(a).unwrap(), Some("alpha"));

        assert!(tree.set_user_data(a, 42i64).unwrap().is_none());
        assert_eq!(tree.user_data::<i64>(a).unwrap(), Some(&42));
        assert_eq!(tree.user_data::<u8>(a).unwrap(), None);
        *tree.user_data_mut::<i64>(a).unwrap().unwrap() = 7;
        let taken = tree.take_user_data(a).unwrap().unwrap();
        assert_eq!(taken.downcast_ref::<i64>(), Some(&7));
    }

    #[test]
    fn test_create_under_stale_parent() {
        let (mut tree, root) = heap_tree();
        let a = tree.create(root, Value(0)).unwrap();
        tree.delete(a).unwrap();
        assert_eq!(tree.create(a, Value(0)), Err(ObjectError::StaleHandle(a)));
    }

    #[test]
    fn test_from_config() {
        let config = TreeConfig::from_toml_str(
            r#"
            [[roots]]
            name = "assets"
            allocator = { kind = "pool", block_size = 64, blocks_in_pool = 4 }

            [[roots]]
            name = "scratch"
            allocator = { kind = "arena", capacity = 256 }
            "#,
        )
        .unwrap();
        let tree = ObjectTree::from_config(&config).unwrap();

        let assets = tree.root_named("assets").unwrap();
        let scratch = tree.root_named("scratch").unwrap();
        assert_eq!(tree.roots(), &[assets, scratch]);
        assert_eq!(
            tree.allocator_stats(assets).unwrap().kind,
            crate::memory::AllocatorKind::Pool
        );
        assert!(tree.root_named("missing").is_none());
    }
}
