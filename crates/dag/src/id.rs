//! Hierarchical node identifiers
//!
//! IDs are `/`-separated paths that start at the literal `root`, for
//! example `root/module.web/task.install`. The last segment is the node's
//! base name, everything before it names the parent.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// The ID of the unique graph root
pub const ROOT: &str = "root";

/// Separator between ID segments
pub const SEPARATOR: char = '/';

/// A hierarchical node identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create an ID from a full path
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The root ID
    pub fn root() -> Self {
        Self(ROOT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    /// The ID one level up, or `None` for a single-segment ID
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once(SEPARATOR)
            .map(|(parent, _)| Self(parent.to_string()))
    }

    /// The last segment of the ID
    pub fn base(&self) -> &str {
        self.0
            .rsplit_once(SEPARATOR)
            .map_or(self.0.as_str(), |(_, base)| base)
    }

    /// A child of this ID with the given base name
    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}{}{}", self.0, SEPARATOR, name))
    }

    /// A sibling of this ID with the given base name
    ///
    /// Single-segment IDs have no parent, so their "sibling" is just `name`.
    pub fn sibling(&self, name: &str) -> Self {
        match self.parent() {
            Some(parent) => parent.child(name),
            None => Self(name.to_string()),
        }
    }

    /// Whether this ID sits strictly below `ancestor`
    pub fn is_descendant_of(&self, ancestor: &Self) -> bool {
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(&ancestor.0)
            && self.0[ancestor.0.len()..].starts_with(SEPARATOR)
    }

    /// Whether `other` is strictly above this ID
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.is_descendant_of(self)
    }

    /// Number of segments below the root (the root itself is depth 0)
    pub fn depth(&self) -> usize {
        self.0.matches(SEPARATOR).count()
    }

    /// Iterate ancestors from the parent up to the top-most segment
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: self.parent(),
        }
    }
}

/// Whether two distinct IDs share the same parent
pub fn are_siblings(a: &NodeId, b: &NodeId) -> bool {
    if a == b {
        return false;
    }
    match (a.parent(), b.parent()) {
        (Some(pa), Some(pb)) => pa == pb,
        _ => false,
    }
}

/// Iterator over the ancestors of an ID, nearest first
pub struct Ancestors {
    next: Option<NodeId>,
}

impl Iterator for Ancestors {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
