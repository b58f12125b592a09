//! Per-node notification hooks
//!
//! The plan and apply stages call a [`Notifier`] around every node so a
//! caller can follow a run as it happens. The RPC server streams these
//! calls to its client; the CLI uses them for progress lines.

use crate::value::Node;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The stage a notification comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Plan,
    Apply,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plan => f.write_str("plan"),
            Self::Apply => f.write_str("apply"),
        }
    }
}

/// Callbacks around the processing of one node
///
/// Both methods run on the worker thread of the node. An error from either
/// fails the node like any other error, and is how a streaming caller stops
/// a run whose client went away.
pub trait Notifier: Send + Sync {
    /// Called before the node is touched
    fn pre(&self, _stage: Stage, _node: &Node) -> Result<()> {
        Ok(())
    }

    /// Called with the node as it was stored after processing
    fn post(&self, _stage: Stage, _node: &Node) -> Result<()> {
        Ok(())
    }
}

/// Notifier that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNotify;

impl Notifier for NoNotify {}
