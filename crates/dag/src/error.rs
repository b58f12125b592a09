//! Error types for graph operations.

use crate::id::NodeId;
use std::fmt;
use thiserror::Error;

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, validating or walking a graph.
#[derive(Debug, Error)]
pub enum Error {
    /// A referenced node is not part of the graph
    #[error("node not found: {0}")]
    NotFound(NodeId),

    /// The graph has no `root` node
    #[error("graph has no root")]
    MissingRoot,

    /// The root has inbound edges
    #[error("root has inbound edges from: {}", join_ids(.0))]
    RootHasInbound(Vec<NodeId>),

    /// A dependency cycle, listed in traversal order
    #[error("cycle detected: {}", join_cycle(.0))]
    Cycle(Vec<NodeId>),

    /// Edges point at IDs that are not in the graph
    #[error("nonexistent vertices in edges: {}", join_ids(.0))]
    DanglingEdges(Vec<NodeId>),

    /// A non-root node lacks its parent or the parent edge
    #[error("{child} is not connected to its parent {parent}")]
    MissingParent {
        /// The orphaned node
        child: NodeId,
        /// The expected parent ID
        parent: NodeId,
    },

    /// Metadata is append-only; a key was overwritten with a different value
    #[error("metadata conflict on {id}: {key:?} is already set to a different value")]
    MetadataConflict {
        /// Node carrying the metadata
        id: NodeId,
        /// Conflicting key
        key: String,
    },

    /// The walk was cancelled through its context
    #[error("cancelled")]
    Cancelled,

    /// A root-first walk could not make progress
    #[error("walk stalled waiting on sibling dependencies of: {}", join_ids(.0))]
    Stalled(Vec<NodeId>),

    /// One or more node functions failed
    #[error("{0}")]
    Walk(NodeErrors),
}

impl Error {
    /// Whether this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Node-level failures carried by a walk error, if any
    pub fn node_errors(&self) -> Option<&NodeErrors> {
        match self {
            Self::Walk(errors) => Some(errors),
            _ => None,
        }
    }
}

/// A failure attributed to one node
#[derive(Debug)]
pub struct NodeError {
    pub id: NodeId,
    pub error: anyhow::Error,
}

/// Aggregate of node failures collected by a walk
///
/// Dependency-failure sentinels are never included: only the node whose own
/// function failed is reported.
#[derive(Debug, Default)]
pub struct NodeErrors(Vec<NodeError>);

impl NodeErrors {
    pub fn new(errors: Vec<NodeError>) -> Self {
        Self(errors)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeError> {
        self.0.iter()
    }

    /// IDs of every failing node
    pub fn ids(&self) -> Vec<&NodeId> {
        self.0.iter().map(|e| &e.id).collect()
    }

    /// The error recorded for a node
    pub fn get(&self, id: &NodeId) -> Option<&anyhow::Error> {
        self.0.iter().find(|e| &e.id == id).map(|e| &e.error)
    }

    pub fn into_inner(self) -> Vec<NodeError> {
        self.0
    }
}

impl fmt::Display for NodeErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            let only = &self.0[0];
            return write!(f, "{}: {:#}", only.id, only.error);
        }
        write!(f, "{} errors occurred:", self.0.len())?;
        for e in &self.0 {
            write!(f, "\n\t* {}: {:#}", e.id, e.error)?;
        }
        Ok(())
    }
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_cycle(ids: &[NodeId]) -> String {
    ids.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_lists_participants() {
        let err = Error::Cycle(vec!["root/a".into(), "root/b".into(), "root/a".into()]);
        assert_eq!(err.to_string(), "cycle detected: root/a -> root/b -> root/a");
    }

    #[test]
    fn test_dangling_display_names_target() {
        let err = Error::DanglingEdges(vec!["root/missing".into()]);
        assert!(err.to_string().contains("root/missing"));
    }

    #[test]
    fn test_node_errors_display() {
        let errors = NodeErrors::new(vec![
            NodeError {
                id: "root/a".into(),
                error: anyhow::anyhow!("boom"),
            },
            NodeError {
                id: "root/b".into(),
                error: anyhow::anyhow!("bang"),
            },
        ]);
        let text = errors.to_string();
        assert!(text.starts_with("2 errors occurred:"));
        assert!(text.contains("root/a: boom"));
        assert!(text.contains("root/b: bang"));
        assert!(errors.get(&"root/b".into()).is_some());
    }
}
