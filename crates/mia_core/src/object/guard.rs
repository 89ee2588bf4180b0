//! # Deletion Guards
//!
//! Objects whose only job is to notice their own deletion, which happens
//! when their parent is deleted.

use super::id::ObjectId;
use super::tree::ObjectTree;
use super::type_tag::{TypeTag, OBJECT};
use super::{DeleteContext, Object};
use crate::error::{ObjResult, ObjectError};

/// Type of [`DeletionGuard`] objects.
pub static DELETION_GUARD: TypeTag = TypeTag::derive(&OBJECT, "DeletionGuard");

/// Callback run when a guard is deleted.
pub type DeleteCallback = Box<dyn FnMut(&DeleteContext<'_>)>;

/// Runs a callback when deleted.
///
/// Attach one to an object to get notified when that object goes away, or
/// use [`ObjectTree::guard_new_assert`] to make the deletion of something
/// that must live forever a hard error.
pub struct DeletionGuard {
    callback: Option<DeleteCallback>,
    message: Option<String>,
}

impl DeletionGuard {
    /// Creates a guard running `callback`.
    #[must_use]
    pub fn new(callback: Option<DeleteCallback>) -> Self {
        Self {
            callback,
            message: None,
        }
    }

    /// Returns the message given at creation, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true if a callback is set.
    #[must_use]
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }
}

impl Object for DeletionGuard {
    fn type_tag(&self) -> &'static TypeTag {
        &DELETION_GUARD
    }

    fn on_delete(&mut self, ctx: &DeleteContext<'_>) {
        if let Some(callback) = self.callback.as_mut() {
            callback(ctx);
        }
    }
}

impl ObjectTree {
    /// Creates a guard owned by `parent` that runs `callback` on deletion.
    ///
    /// The callback gets the guard's name and user data through the
    /// [`DeleteContext`].
    ///
    /// # Errors
    ///
    /// Same as [`ObjectTree::create`].
    pub fn guard_new<F>(&mut self, parent: ObjectId, callback: F) -> ObjResult<ObjectId>
    where
        F: FnMut(&DeleteContext<'_>) + 'static,
    {
        self.create(parent, DeletionGuard::new(Some(Box::new(callback))))
    }

    /// Creates a guard that panics when deleted.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectTree::create`].
    pub fn guard_new_assert(
        &mut self,
        parent: ObjectId,
        name: Option<&str>,
        message: Option<&str>,
    ) -> ObjResult<ObjectId> {
        let text = message.unwrap_or("must not be deleted").to_owned();
        let callback: DeleteCallback = Box::new(move |ctx: &DeleteContext<'_>| {
            let name = ctx.name().unwrap_or("");
            tracing::error!("deletion guard \"{}\" deleted: {}", name, text);
            panic!("deletion guard \"{name}\" deleted: {text}");
        });
        self.named_guard(parent, name, message, callback)
    }

    /// Creates a guard that logs its deletion at trace level.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectTree::create`].
    pub fn guard_new_log_trace(
        &mut self,
        parent: ObjectId,
        name: Option<&str>,
        message: Option<&str>,
    ) -> ObjResult<ObjectId> {
        let text = message.unwrap_or("").to_owned();
        let callback: DeleteCallback = Box::new(move |ctx: &DeleteContext<'_>| {
            tracing::trace!(
                "deletion guard \"{}\" deleted: {}",
                ctx.name().unwrap_or(""),
                text
            );
        });
        self.named_guard(parent, name, message, callback)
    }

    fn named_guard(
        &mut self,
        parent: ObjectId,
        name: Option<&str>,
        message: Option<&str>,
        callback: DeleteCallback,
    ) -> ObjResult<ObjectId> {
        let guard = DeletionGuard {
            callback: Some(callback),
            message: message.map(str::to_owned),
        };
        let id = self.create(parent, guard)?;
        self.set_name(id, name)?;
        Ok(id)
    }

    /// Replaces the callback of a guard, `None` to disarm it.
    ///
    /// # Errors
    ///
    /// `NotAGuard` if `guard` is not a [`DeletionGuard`], or `StaleHandle`.
    pub fn guard_set_callback(
        &mut self,
        guard: ObjectId,
        callback: Option<DeleteCallback>,
    ) -> ObjResult<()> {
        self.node_mut(guard)?
            .payload_any_mut()
            .downcast_mut::<DeletionGuard>()
            .ok_or(ObjectError::NotAGuard(guard))?
            .callback = callback;
        Ok(())
    }
}
