//! Configuration and pipeline errors

use dag::NodeId;
use thiserror::Error;

/// Result type alias for pipeline stages.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading or transforming a configuration.
///
/// Everything here aborts a run before any check or apply happens. Failures
/// of individual resources are reported through their [`Status`] instead.
///
/// [`Status`]: crate::Status
#[derive(Debug, Error)]
pub enum Error {
    /// A location could not be understood
    #[error("invalid location {location:?}: {message}")]
    Location { location: String, message: String },

    /// Fetching a location failed
    #[error("failed to fetch {location}: {message}")]
    Fetch { location: String, message: String },

    /// A document is malformed
    #[error("{location}: {message}")]
    Parse { location: String, message: String },

    /// An attribute has the wrong type
    #[error("{id}: attribute {key:?} must be {expected}")]
    Attribute {
        id: String,
        key: String,
        expected: &'static str,
    },

    /// Two resources share an ID within one parent
    #[error("duplicate resource {0}")]
    Duplicate(NodeId),

    /// A module includes itself, directly or not
    #[error("module cycle: {0} is already being loaded")]
    ModuleCycle(String),

    /// No plug-in is registered for a kind
    #[error("{id}: unknown resource kind {kind:?}")]
    UnknownKind { id: NodeId, kind: String },

    /// Any other structural problem with the configuration
    #[error("{id}: {message}")]
    Invalid { id: NodeId, message: String },

    /// A plug-in failed to decode its block
    #[error("{id}: {error:#}")]
    Decode { id: NodeId, error: anyhow::Error },

    /// A graph operation failed
    #[error(transparent)]
    Graph(#[from] dag::Error),
}

impl Error {
    pub(crate) fn invalid(id: &NodeId, message: impl Into<String>) -> Self {
        Self::Invalid {
            id: id.clone(),
            message: message.into(),
        }
    }

    /// Whether the run was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Graph(dag::Error::Cancelled))
    }
}
