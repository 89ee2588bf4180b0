//! # Weak References
//!
//! A [`WeakRef`] is itself an object with an owner. It points at another
//! object without owning it and is cleared the moment that object is
//! deleted.

use super::id::ObjectId;
use super::tree::ObjectTree;
use super::type_tag::{TypeTag, OBJECT};
use super::Object;
use crate::error::{ObjResult, ObjectError};

/// Type of [`WeakRef`] objects.
pub static WEAK_REF: TypeTag = TypeTag::derive(&OBJECT, "WeakRef");

/// Non-owning pointer to another object.
///
/// ```rust
/// use mia_core::{Object, ObjectTree};
///
/// struct Player;
/// impl Object for Player {}
///
/// let mut tree = ObjectTree::new();
/// let root = tree.create_root_heap().unwrap();
/// let player = tree.create(root, Player).unwrap();
///
/// let target = tree.weak_new(root, Some(player)).unwrap();
/// assert_eq!(tree.weak_get(target).unwrap(), Some(player));
///
/// tree.delete(player).unwrap();
/// assert_eq!(tree.weak_get(target).unwrap(), None);
/// ```
#[derive(Debug, Default)]
pub struct WeakRef {
    target: Option<ObjectId>,
}

impl WeakRef {
    /// Returns the referenced object, `None` once cleared.
    #[inline]
    #[must_use]
    pub const fn target(&self) -> Option<ObjectId> {
        self.target
    }
}

impl Object for WeakRef {
    fn type_tag(&self) -> &'static TypeTag {
        &WEAK_REF
    }
}

impl ObjectTree {
    /// Creates a weak reference owned by `parent`, pointing at `target`.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if `parent` or `target` is gone, or the allocator error.
    pub fn weak_new(&mut self, parent: ObjectId, target: Option<ObjectId>) -> ObjResult<ObjectId> {
        if let Some(target) = target {
            self.node(target)?;
        }
        let weak = self.create(parent, WeakRef::default())?;
        self.weak_set(weak, target)?;
        Ok(weak)
    }

    /// Repoints a weak reference, `None` to clear it.
    ///
    /// # Errors
    ///
    /// `NotAWeakRef` if `weak` is not a [`WeakRef`], `StaleHandle` for a
    /// dead target.
    pub fn weak_set(&mut self, weak: ObjectId, target: Option<ObjectId>) -> ObjResult<()> {
        if let Some(target) = target {
            self.node(target)?;
        }
        let old = self.weak_mut(weak)?.target.take();
        if let Some(old) = old {
            self.unwatch(old, weak);
        }
        if let Some(target) = target {
            self.node_mut(target)?.watchers.push(weak);
            self.weak_mut(weak)?.target = Some(target);
        }
        Ok(())
    }

    /// Returns the referenced object, or `None` if it was deleted.
    ///
    /// # Errors
    ///
    /// `NotAWeakRef` if `weak` is not a [`WeakRef`].
    pub fn weak_get(&self, weak: ObjectId) -> ObjResult<Option<ObjectId>> {
        let weak_ref = self
            .node(weak)?
            .payload_any()
            .downcast_ref::<WeakRef>()
            .ok_or(ObjectError::NotAWeakRef(weak))?;
        Ok(weak_ref.target.filter(|&target| self.contains(target)))
    }

    fn weak_mut(&mut self, weak: ObjectId) -> ObjResult<&mut WeakRef> {
        self.node_mut(weak)?
            .payload_any_mut()
            .downcast_mut::<WeakRef>()
            .ok_or(ObjectError::NotAWeakRef(weak))
    }

    /// Forgets `weak` in the watcher list of `target`.
    pub(super) fn unwatch(&mut self, target: ObjectId, weak: ObjectId) {
        if let Ok(node) = self.node_mut(target) {
            if let Some(pos) = node.watchers.iter().rposition(|&w| w == weak) {
                node.watchers.swap_remove(pos);
            }
        }
    }

    /// Clears `weak` if it still points at the dying `target`.
    pub(super) fn clear_weak(&mut self, weak: ObjectId, target: ObjectId) {
        if let Ok(weak_ref) = self.weak_mut(weak) {
            if weak_ref.target == Some(target) {
                weak_ref.target = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thing;

    impl Object for Thing {}

    fn setup() -> (ObjectTree, ObjectId, ObjectId) {
        let mut tree = ObjectTree::new();
        let root = tree.create_root_heap().unwrap();
        let thing = tree.create(root, Thing).unwrap();
        (tree, root, thing)
    }

    #[test]
    fn test_weak_cleared_on_target_delete() {
        let (mut tree, root, thing) = setup();
        let weak = tree.weak_new(root, Some(thing)).unwrap();
        assert!(tree.check_type(weak, &WEAK_REF));
        assert_eq!(tree.weak_get(weak).unwrap(), Some(thing));

        tree.delete(thing).unwrap();
        assert_eq!(tree.weak_get(weak).unwrap(), None);
        assert_eq!(tree.get::<WeakRef>(weak).unwrap().target(), None);
    }

    #[test]
    fn test_weak_set_moves_registration() {
        let (mut tree, root, thing) = setup();
        let other = tree.create(root, Thing).unwrap();
        let weak = tree.weak_new(root, Some(thing)).unwrap();

        tree.weak_set(weak, Some(other)).unwrap();
        assert_eq!(tree.node(thing).unwrap().watchers.len(), 0);

        // Deleting the old target no longer affects it
        tree.delete(thing).unwrap();
        assert_eq!(tree.weak_get(weak).unwrap(), Some(other));

        tree.weak_set(weak, None).unwrap();
        assert_eq!(tree.weak_get(weak).unwrap(), None);
        assert!(tree.node(other).unwrap().watchers.is_empty());
    }

    #[test]
    fn test_deleting_weak_unregisters() {
        let (mut tree, root, thing) = setup();
        let weak = tree.weak_new(root, Some(thing)).unwrap();
        tree.delete(weak).unwrap();
        assert!(tree.node(thing).unwrap().watchers.is_empty());
    }

    #[test]
    fn test_weak_inside_deleted_subtree() {
        let (mut tree, _, thing) = setup();
        // The weak ref is a child of its own target
        let weak = tree.weak_new(thing, Some(thing)).unwrap();
        assert_eq!(tree.delete(thing).unwrap(), 2);
        assert!(!tree.contains(weak));
    }

    #[test]
    fn test_weak_errors() {
        let (mut tree, root, thing) = setup();
        assert_eq!(tree.weak_get(thing), Err(ObjectError::NotAWeakRef(thing)));

        tree.delete(thing).unwrap();
        assert_eq!(
            tree.weak_new(root, Some(thing)),
            Err(ObjectError::StaleHandle(thing))
        );
        let empty = tree.weak_new(root, None).unwrap();
        assert_eq!(tree.weak_get(empty).unwrap(), None);
    }
}
