//! # Declarative
//!
//! Graph-based declarative configuration.
//!
//! A configuration is a tree of blocks. Loading turns it into a graph of
//! nodes, one per block, which a series of transforms then rewrites until
//! every node holds a task that can be checked against the system and
//! applied to it.
//!
//! ## Stages
//!
//! - **Load**: fetch documents, nest modules, inject named locks
//! - **Transform**: dependencies, conditionals, duplicate merging,
//!   registry lookup, group serialization
//! - **Render**: evaluate templates; nodes waiting on other nodes become
//!   thunks
//! - **Plan**: check every task, leaves first
//! - **Apply**: check, apply and check again
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{Context, Pipeline, Registry};
//!
//! let mut registry = Registry::with_builtins();
//! registry.register::<FileContent>("file.content");
//!
//! let execution = Pipeline::new()
//!     .registry(&registry)
//!     .plan(&Context::new(), "main.toml")?;
//!
//! println!("{}", execution.summary());
//! ```

pub mod ast;
pub mod builtin;
mod context;
mod error;
mod executor;
pub mod load;
pub mod metadata;
mod pipeline;
mod planner;
mod registry;
pub mod render;
mod resource;
mod status;
mod summary;
pub mod transform;
mod value;

pub use ast::{AstNode, Block, Document};
pub use context::{NoNotify, Notifier, Stage};
pub use error::{Error, Result};
pub use executor::apply;
pub use load::Params;
pub use pipeline::Pipeline;
pub use planner::{Execution, plan};
pub use registry::Registry;
pub use render::{RenderError, Renderer, is_unresolvable, render};
pub use resource::{Fields, FromBlock, Preparer, Task};
pub use status::{Diff, DiffDetails, Health, Level, Status, StatusDetails};
pub use summary::{HealthCheck, Summary, health_checks};
pub use value::{Graph, Node, NodeValue, PrepareThunk, PreparerNode, TaskNode};

pub use dag::{Context, NodeId};
