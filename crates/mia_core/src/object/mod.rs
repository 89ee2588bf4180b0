//! # Ownership Tree
//!
//! Every object has exactly one parent (roots have none) and is deleted
//! together with it.
//!
//! ## Design Philosophy
//!
//! - Objects live in a slot arena and are addressed by generational
//!   [`ObjectId`]s; a handle to a deleted object never resolves again
//! - Type-specific behavior goes through the [`Object`] trait, the runtime
//!   type id is a [`TypeTag`] chain
//! - Teardown is depth-first: an object's own [`Object::on_delete`] runs
//!   before its children are deleted, its memory is released after them

use std::any::Any;

mod guard;
mod id;
mod managed_memory;
mod query;
mod tree;
mod type_tag;
mod weak;

pub use guard::{DeleteCallback, DeletionGuard, DELETION_GUARD};
pub use id::ObjectId;
pub use query::Descendants;
pub use tree::{ObjectTree, ROOT};
pub use type_tag::{TypeTag, OBJECT};
pub use weak::{WeakRef, WEAK_REF};

/// Upcast helper so payloads can be downcast to their concrete type.
pub trait AsAny: Any {
    /// Returns `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// Returns `self` as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The dispatch table of a managed object.
///
/// Payloads stored in the tree implement this trait. Cleanup that must
/// happen before the children go away (releasing a foreign handle, flushing
/// a stream) belongs in [`Object::on_delete`]; the payload's `Drop` runs
/// later, when its memory is returned, after all children are gone.
///
/// ```rust
/// use mia_core::{DeleteContext, Object, ObjectTree, TypeTag, OBJECT};
///
/// static TEXTURE: TypeTag = TypeTag::derive(&OBJECT, "Texture");
///
/// struct Texture {
///     gl_handle: u32,
/// }
///
/// impl Object for Texture {
///     fn type_tag(&self) -> &'static TypeTag {
///         &TEXTURE
///     }
///
///     fn on_delete(&mut self, _ctx: &DeleteContext<'_>) {
///         self.gl_handle = 0; // glDeleteTextures would go here
///     }
/// }
///
/// let mut tree = ObjectTree::new();
/// let root = tree.create_root_heap().unwrap();
/// let tex = tree.create(root, Texture { gl_handle: 7 }).unwrap();
/// tree.assert_type(tex, &TEXTURE);
/// tree.delete(tex).unwrap();
/// assert!(!tree.contains(tex));
/// ```
pub trait Object: AsAny {
    /// Returns the runtime type id.
    fn type_tag(&self) -> &'static TypeTag {
        &OBJECT
    }

    /// Type-specific cleanup, run before the children are deleted.
    fn on_delete(&mut self, _ctx: &DeleteContext<'_>) {}
}

/// Read-only view of an object while its deletor runs.
pub struct DeleteContext<'a> {
    pub(crate) id: ObjectId,
    pub(crate) name: Option<&'a str>,
    pub(crate) tag: &'static TypeTag,
    pub(crate) user_data: Option<&'a dyn Any>,
}

impl<'a> DeleteContext<'a> {
    /// The dying object.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    /// The dying object's name.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> Option<&'a str> {
        self.name
    }

    /// The dying object's type.
    #[inline]
    #[must_use]
    pub const fn type_tag(&self) -> &'static TypeTag {
        self.tag
    }

    /// The dying object's user data, if it is a `T`.
    #[must_use]
    pub fn user_data<T: Any>(&self) -> Option<&'a T> {
        self.user_data.and_then(|data| data.downcast_ref::<T>())
    }
}

/// Where an object is in its life.
///
/// Freed objects have no lifecycle; their handles are stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Live and usable.
    Constructed,
    /// Its own [`Object::on_delete`] is running.
    Deleting,
    /// Its children are being torn down.
    ChildrenDeleting,
}

/// Payload of untyped objects and roots: the allocator block is the data.
pub(crate) struct Blank {
    pub(crate) tag: &'static TypeTag,
}

impl Object for Blank {
    fn type_tag(&self) -> &'static TypeTag {
        self.tag
    }
}
