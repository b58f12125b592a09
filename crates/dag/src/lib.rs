//! Concurrent, hierarchically named acyclic graphs
//!
//! The kernel behind keel's load, render, plan and apply stages: node IDs
//! are `/`-separated paths starting at `root`, edges are typed as
//! dependency or parent, and every stage is a copy-walk-validate transform.

mod context;
mod error;
mod graph;
mod id;
mod merge;
mod node;
mod walk;

pub use context::{Context, POLL_INTERVAL, Signal};
pub use error::{Error, NodeError, NodeErrors, Result};
pub use graph::Graph;
pub use id::{Ancestors, NodeId, ROOT, SEPARATOR, are_siblings};
pub use merge::ContentHash;
pub use node::{Edge, EdgeKind, Metadata, Node};
