//! Graph nodes and edges

use crate::error::{Error, Result};
use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Free-form, append-only node metadata
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A node: an ID, an optional serialization group, metadata and a value
///
/// Values are reference counted so that copying a graph copies pointers,
/// not values.
pub struct Node<V> {
    id: NodeId,
    group: Option<String>,
    metadata: Metadata,
    value: Arc<V>,
}

impl<V> Node<V> {
    pub fn new(id: impl Into<NodeId>, value: V) -> Self {
        Self::from_arc(id, Arc::new(value))
    }

    pub fn from_arc(id: impl Into<NodeId>, value: Arc<V>) -> Self {
        Self {
            id: id.into(),
            group: None,
            metadata: Metadata::new(),
            value,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    /// A shared handle to the value
    pub fn value_arc(&self) -> Arc<V> {
        Arc::clone(&self.value)
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn with_group(mut self, group: Option<String>) -> Self {
        self.group = group.filter(|g| !g.is_empty());
        self
    }

    /// The same node (ID, group, metadata) carrying a new value
    pub fn with_value(&self, value: V) -> Self {
        Self {
            id: self.id.clone(),
            group: self.group.clone(),
            metadata: self.metadata.clone(),
            value: Arc::new(value),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn get_metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    /// Metadata value as a string, when it is one
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(serde_json::Value::as_str)
    }

    /// Add a metadata entry
    ///
    /// Re-adding an identical value is a no-op; a different value for an
    /// existing key is rejected.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) -> Result<()> {
        let key = key.into();
        match self.metadata.get(&key) {
            Some(existing) if *existing == value => Ok(()),
            Some(_) => Err(Error::MetadataConflict {
                id: self.id.clone(),
                key,
            }),
            None => {
                self.metadata.insert(key, value);
                Ok(())
            }
        }
    }
}

impl<V> Clone for Node<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            group: self.group.clone(),
            metadata: self.metadata.clone(),
            value: Arc::clone(&self.value),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Node<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("metadata", &self.metadata)
            .field("value", &self.value)
            .finish()
    }
}

/// Edge kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// `dest` must complete before `source`
    Dependency,
    /// Structural containment, `source` is the parent of `dest`
    Parent,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dependency => f.write_str("dependency"),
            Self::Parent => f.write_str("parent"),
        }
    }
}

/// A directed, typed edge
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub dest: NodeId,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn new(source: impl Into<NodeId>, dest: impl Into<NodeId>, kind: EdgeKind) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            kind,
        }
    }

    pub fn is_parent(&self) -> bool {
        self.kind == EdgeKind::Parent
    }
}
