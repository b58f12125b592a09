//! The resource plug-in contract
//!
//! A plug-in provides two stages of the same resource:
//!
//! - a [`Preparer`], decoded from a configuration block, still holding raw
//!   template strings;
//! - a [`Task`], produced by [`Preparer::prepare`] once every template has
//!   rendered, which can be checked against and applied to the system.
//!
//! # Example
//!
//! ```ignore
//! use declarative::{Block, Context, FromBlock, Preparer, Renderer, Status, Task};
//!
//! #[derive(Debug, serde::Deserialize)]
//! struct Motd { content: String }
//!
//! impl FromBlock for Motd {
//!     fn from_block(block: &Block) -> anyhow::Result<Self> { block.decode() }
//! }
//!
//! impl Preparer for Motd {
//!     fn prepare(&self, _ctx: &Context, render: &Renderer) -> anyhow::Result<Box<dyn Task>> {
//!         let content = render.render("content", &self.content)?;
//!         Ok(Box::new(MotdTask { content }))
//!     }
//! }
//! ```

use crate::ast::Block;
use crate::render::Renderer;
use crate::status::Status;
use dag::Context;
use std::collections::BTreeMap;
use std::fmt;

/// Fields a task exposes to `lookup`
pub type Fields = BTreeMap<String, serde_json::Value>;

/// A resource whose templates have not been rendered yet
pub trait Preparer: Send + Sync + fmt::Debug {
    /// Render templates and build the task
    ///
    /// Returning a [`RenderError::Unresolvable`] (possibly wrapped in
    /// context) defers the node until its references are available.
    ///
    /// [`RenderError::Unresolvable`]: crate::RenderError::Unresolvable
    fn prepare(&self, ctx: &Context, render: &Renderer<'_>) -> anyhow::Result<Box<dyn Task>>;

    /// Serialization group shared with other resources, if any
    fn group(&self) -> Option<String> {
        None
    }
}

/// A fully rendered resource
pub trait Task: Send + Sync + fmt::Debug {
    /// Compare the desired state with the system, without changing it
    fn check(&self, ctx: &Context, render: &Renderer<'_>) -> anyhow::Result<Status>;

    /// Bring the system to the desired state
    fn apply(&self, ctx: &Context) -> anyhow::Result<Status>;

    /// Values other nodes can `lookup`
    fn exported_fields(&self) -> Fields {
        Fields::new()
    }
}

/// Build a preparer from its configuration block
pub trait FromBlock: Sized {
    fn from_block(block: &Block) -> anyhow::Result<Self>;
}
