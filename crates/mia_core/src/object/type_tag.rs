//! # Type Tags
//!
//! Runtime type ids built by appending a segment to the supertype's id.
//! `Obj` -> `ObjWeakRef`; a widget crate would declare `ObjWidget` and then
//! `ObjWidgetButton` on top of it.
//!
//! A tag is an ancestor of another when its id is a byte prefix of the
//! other's id, so `ObjWid` also counts as an ancestor of `ObjWidgetButton`.
//! Ids are compared segment by segment without building strings.

use std::fmt;

/// A node in the type hierarchy.
///
/// Declare tags as statics so they can be referenced from
/// [`Object::type_tag`](super::Object::type_tag):
///
/// ```rust
/// use mia_core::{TypeTag, OBJECT};
///
/// static WIDGET: TypeTag = TypeTag::derive(&OBJECT, "Widget");
/// static BUTTON: TypeTag = TypeTag::derive(&WIDGET, "Button");
///
/// assert!(BUTTON.is_a(&WIDGET));
/// assert!(BUTTON.is_a(&OBJECT));
/// assert!(!WIDGET.is_a(&BUTTON));
/// assert_eq!(BUTTON.to_string(), "ObjWidgetButton");
/// ```
#[derive(Debug)]
pub struct TypeTag {
    segment: &'static str,
    parent: Option<&'static TypeTag>,
    depth: usize,
}

/// The base of every type hierarchy.
pub static OBJECT: TypeTag = TypeTag::root("Obj");

impl TypeTag {
    /// Creates a hierarchy root. Only [`OBJECT`] should normally exist.
    #[must_use]
    pub const fn root(segment: &'static str) -> Self {
        Self {
            segment,
            parent: None,
            depth: 0,
        }
    }

    /// Creates a subtype of `parent`.
    #[must_use]
    pub const fn derive(parent: &'static TypeTag, segment: &'static str) -> Self {
        Self {
            segment,
            parent: Some(parent),
            depth: parent.depth + 1,
        }
    }

    /// Returns this type's own segment.
    #[inline]
    #[must_use]
    pub const fn segment(&self) -> &'static str {
        self.segment
    }

    /// Returns the supertype.
    #[inline]
    #[must_use]
    pub const fn parent(&self) -> Option<&'static TypeTag> {
        self.parent
    }

    /// Returns the number of ancestors.
    #[inline]
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the length of the full id in bytes.
    #[must_use]
    pub fn id_len(&self) -> usize {
        let mut len = 0;
        let mut node = Some(self);
        while let Some(tag) = node {
            len += tag.segment.len();
            node = tag.parent;
        }
        len
    }

    /// Returns true if the id of `ancestor` is a prefix of this id.
    ///
    /// Every supertype passes, as does any tag whose id happens to be a
    /// leading part of this one.
    #[must_use]
    pub fn is_a(&self, ancestor: &TypeTag) -> bool {
        let mut node = Some(self);
        while let Some(tag) = node {
            if std::ptr::eq(tag, ancestor) {
                return true;
            }
            node = tag.parent;
        }

        let len = self.id_len();
        let mut end = ancestor.id_len();
        if end > len {
            return false;
        }
        let mut node = Some(ancestor);
        while let Some(tag) = node {
            let start = end - tag.segment.len();
            if !self.matches_at(len, start, tag.segment.as_bytes()) {
                return false;
            }
            end = start;
            node = tag.parent;
        }
        true
    }

    /// Returns true if `bytes` occur in this id at `offset`. `len` is
    /// `self.id_len()`.
    fn matches_at(&self, len: usize, offset: usize, bytes: &[u8]) -> bool {
        let end = offset + bytes.len();
        if end > len {
            return false;
        }

        // Walk segments from the leaf up, comparing the overlapping bytes
        let mut seg_end = len;
        let mut node = Some(self);
        while let Some(tag) = node {
            let seg = tag.segment.as_bytes();
            let seg_start = seg_end - seg.len();
            let lo = offset.max(seg_start);
            let hi = end.min(seg_end);
            if lo < hi && seg[lo - seg_start..hi - seg_start] != bytes[lo - offset..hi - offset] {
                return false;
            }
            if seg_start <= offset {
                break;
            }
            seg_end = seg_start;
            node = tag.parent;
        }
        true
    }

    /// Returns the full id, every segment from the root down.
    #[must_use]
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id_len() == other.id_len() && self.is_a(other)
    }
}

impl Eq for TypeTag {}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent {
            fmt::Display::fmt(parent, f)?;
        }
        f.write_str(self.segment)
    }
}
