//! Graph transforms between loading and rendering
//!
//! Each stage takes a graph and returns a new, validated one:
//!
//! 1. [`resolve_dependencies`]: explicit `depends` and template references
//! 2. [`resolve_conditionals`]: switch/case bookkeeping
//! 3. [`merge_duplicates`]: identical literal blocks collapse into one
//! 4. [`set_resources`]: blocks become preparers
//! 5. [`serialize_groups`]: group and lock members are chained

pub mod conditional;
pub mod dependencies;
pub mod groups;
pub mod resources;

pub use conditional::{ConditionalPreparer, ConditionalTask, case_active, resolve_conditionals};
pub use dependencies::{DEPENDS, resolve_dependencies};
pub use groups::serialize_groups;
pub use resources::set_resources;

use crate::builtin::is_structural;
use crate::error::Result;
use crate::metadata;
use crate::value::{Graph, Node};
use dag::Context;
use log::info;

/// Merge subtrees declared more than once with identical content
pub fn merge_duplicates(ctx: &Context, graph: &Graph) -> Result<Graph> {
    info!("merging duplicates");
    Ok(graph.merge_duplicates(ctx, keep_distinct)?)
}

/// Nodes whose identity is their position in the tree
fn keep_distinct(node: &Node) -> bool {
    node.metadata_str(metadata::KIND).is_none_or(is_structural)
        || node.get_metadata(metadata::CONDITIONAL_CASE).is_some()
        || node.get_metadata(metadata::REFERENCED).is_some()
}
