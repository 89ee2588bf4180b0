//! # Tree Queries
//!
//! Searches by type and name, and debug listings.
//!
//! All recursive searches take an `r_level`: `<= 0` looks at one level
//! only, `i32::MAX` searches everything.

use std::fmt::Write as _;

use super::id::ObjectId;
use super::tree::ObjectTree;
use super::type_tag::TypeTag;
use crate::error::ObjResult;

fn level(r_level: i32) -> usize {
    usize::try_from(r_level).unwrap_or(0)
}

impl ObjectTree {
    fn matches(&self, obj: ObjectId, tag: &TypeTag, name: Option<&str>) -> bool {
        self.node(obj).is_ok_and(|node| {
            node.tag.is_a(tag) && name.map_or(true, |name| node.name.as_deref() == Some(name))
        })
    }

    /// Finds the first object deriving from `tag` (and named `name`, if
    /// given): `obj` itself, then its children, then their subtrees up to
    /// `r_level` further levels.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if `obj` is gone.
    pub fn find(
        &self,
        obj: ObjectId,
        tag: &TypeTag,
        name: Option<&str>,
        r_level: i32,
    ) -> ObjResult<Option<ObjectId>> {
        self.node(obj)?;
        if self.matches(obj, tag, name) {
            return Ok(Some(obj));
        }
        Ok(self.find_child(obj, tag, name, level(r_level)))
    }

    fn find_child(
        &self,
        obj: ObjectId,
        tag: &TypeTag,
        name: Option<&str>,
        r_level: usize,
    ) -> Option<ObjectId> {
        let children = self.children(obj).ok()?;
        if let Some(&found) = children.iter().find(|&&child| self.matches(child, tag, name)) {
            return Some(found);
        }
        if r_level == 0 {
            return None;
        }
        children
            .iter()
            .find_map(|&child| self.find_child(child, tag, name, r_level - 1))
    }

    /// Finds the closest ancestor deriving from `tag` (and named `name`, if
    /// given), looking at most `r_level` levels above the parent.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if `obj` is gone.
    pub fn find_parent(
        &self,
        obj: ObjectId,
        tag: &TypeTag,
        name: Option<&str>,
        r_level: i32,
    ) -> ObjResult<Option<ObjectId>> {
        let mut current = self.node(obj)?.parent;
        let mut remaining = level(r_level);
        while let Some(parent) = current {
            if self.matches(parent, tag, name) {
                return Ok(Some(parent));
            }
            if remaining == 0 {
                break;
            }
            remaining -= 1;
            current = self.parent(parent)?;
        }
        Ok(None)
    }

    /// Finds the object holding `child` directly, searching `obj` and up to
    /// `r_level` levels of its descendants.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if `obj` is gone.
    pub fn child_search_parent(
        &self,
        obj: ObjectId,
        child: ObjectId,
        r_level: i32,
    ) -> ObjResult<Option<ObjectId>> {
        self.node(obj)?;
        let Ok(Some(parent)) = self.parent(child) else {
            return Ok(None);
        };
        Ok(self
            .distance(obj, parent)
            .filter(|&d| d <= level(r_level))
            .map(|_| parent))
    }

    /// Returns `obj` and all its descendants in depth-first order.
    #[must_use]
    pub fn descendants(&self, obj: ObjectId) -> Descendants<'_> {
        let stack = if self.contains(obj) { vec![obj] } else { Vec::new() };
        Descendants { tree: self, stack }
    }

    /// Renders the children of `obj` as an indented listing, recursing up
    /// to `r_level` levels.
    ///
    /// ```text
    /// ObjWidget (toolbar) #1v0
    ///   ObjWidgetButton #2v0
    /// ObjWeakRef #3v0
    /// ```
    ///
    /// # Errors
    ///
    /// `StaleHandle` if `obj` is gone.
    pub fn debug_dump(&self, obj: ObjectId, r_level: i32) -> ObjResult<String> {
        let mut out = String::new();
        let mut stack: Vec<(ObjectId, usize)> = self
            .children(obj)?
            .iter()
            .rev()
            .map(|&child| (child, 0))
            .collect();
        let max = level(r_level);

        while let Some((id, depth)) = stack.pop() {
            let node = self.node(id)?;
            let indent = depth * 2;
            // Writing into a String cannot fail
            write!(out, "{:indent$}{}", "", node.tag).ok();
            if let Some(name) = node.name.as_deref() {
                write!(out, " ({name})").ok();
            }
            writeln!(out, " {id}").ok();
            if depth < max {
                stack.extend(node.children.iter().rev().map(|&child| (child, depth + 1)));
            }
        }
        Ok(out)
    }
}

/// Depth-first iterator over a subtree, see [`ObjectTree::descendants`].
pub struct Descendants<'a> {
    tree: &'a ObjectTree,
    stack: Vec<ObjectId>,
}

impl Iterator for Descendants<'_> {
    type Item = ObjectId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;

        // Push children in reverse order so they're visited first to last
        if let Ok(children) = self.tree.children(id) {
            self.stack.extend(children.iter().rev().copied());
        }

        Some(id)
    }
}
