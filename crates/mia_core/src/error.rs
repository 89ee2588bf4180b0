//! # Error Types
//!
//! Failures of the allocator layer and of the ownership tree.
//!
//! Type assertions and deletion guards abort via panic instead of
//! returning one of these; everything else surfaces as a `Result`.

use thiserror::Error;

use crate::memory::AllocatorKind;
use crate::object::ObjectId;

/// Errors raised by an [`Allocator`](crate::memory::Allocator).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The allocator cannot satisfy the request.
    #[error("out of memory: {allocator} allocator could not provide {requested} bytes")]
    OutOfMemory {
        /// Bytes requested.
        requested: usize,
        /// Kind of the allocator that failed.
        allocator: AllocatorKind,
    },

    /// The block was already released or never existed.
    #[error("invalid or stale block")]
    InvalidBlock,

    /// The block was released twice.
    #[error("double free detected")]
    DoubleFree,

    /// The block was produced by a different kind of allocator.
    #[error("block does not belong to this {0} allocator")]
    ForeignBlock(AllocatorKind),
}

/// Result type for allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors raised by the [`ObjectTree`](crate::object::ObjectTree).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    /// The root allocator failed.
    #[error(transparent)]
    Alloc(#[from] AllocError),

    /// The handle refers to an object that was deleted (or never existed).
    #[error("stale object handle {0}")]
    StaleHandle(ObjectId),

    /// The object does not derive from the requested type.
    #[error("type mismatch: wanted \"{expected}\", got \"{found}\"")]
    TypeMismatch {
        /// The requested type id.
        expected: String,
        /// The object's actual type id.
        found: String,
    },

    /// The move would make an object its own ancestor.
    #[error("moving {object} into {into} would create a cycle")]
    CycleDetected {
        /// The object being moved.
        object: ObjectId,
        /// The requested new parent.
        into: ObjectId,
    },

    /// Source and destination live under different roots (different allocators).
    #[error("cannot move {object} into {into}: objects live under different roots")]
    CrossRootMove {
        /// The object (or owner of the memory) being moved.
        object: ObjectId,
        /// The requested new parent.
        into: ObjectId,
    },

    /// Roots have no parent and cannot be moved.
    #[error("root {0} cannot be moved")]
    RootNotMovable(ObjectId),

    /// The parent is being torn down.
    #[error("parent {0} is being deleted")]
    ParentDeleting(ObjectId),

    /// The memory block is not owned anywhere in the searched hierarchy.
    #[error("memory block not found in the object hierarchy")]
    MemoryNotFound,

    /// The object is not a weak reference.
    #[error("object {0} is not a weak reference")]
    NotAWeakRef(ObjectId),

    /// The object is not a deletion guard.
    #[error("object {0} is not a deletion guard")]
    NotAGuard(ObjectId),

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for tree operations.
pub type ObjResult<T> = Result<T, ObjectError>;
