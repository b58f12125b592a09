//! Duplicate subtree merging

use crate::context::Context;
use crate::error::Result;
use crate::graph::Graph;
use crate::id::NodeId;
use crate::node::{EdgeKind, Node};
use log::debug;
use std::collections::HashMap;

/// Structural hash of a node value
///
/// Values returning `None` are never merged.
pub trait ContentHash {
    fn content_hash(&self) -> Option<String>;
}

impl<V: Send + Sync + ContentHash> Graph<V> {
    /// Collapse subtrees whose values hash equal onto the first one seen
    ///
    /// Nodes are visited root first. A duplicate has its inbound edges
    /// pointed at the surviving node and is then removed together with all
    /// of its descendants. Nodes matched by `skip` are left alone.
    pub fn merge_duplicates<S>(&self, ctx: &Context, skip: S) -> Result<Self>
    where
        S: Fn(&Node<V>) -> bool,
    {
        let mut seen: HashMap<String, NodeId> = HashMap::new();

        self.root_first_transform(ctx, |graph, id, node| {
            if id.is_root() || skip(node) {
                return Ok(());
            }
            let Some(hash) = node.value().content_hash() else {
                return Ok(());
            };

            let Some(target) = seen.get(&hash).cloned() else {
                seen.insert(hash, id.clone());
                return Ok(());
            };
            if !graph.contains(&target) || target.is_ancestor_of(id) || id.is_ancestor_of(&target) {
                return Ok(());
            }

            debug!("merging {id} into {target}");
            for edge in graph.up_edges(id) {
                if edge.source == target || edge.source.is_descendant_of(id) {
                    continue;
                }
                // only the survivor's own parent keeps a structural edge
                let kind = if target.parent().as_ref() == Some(&edge.source) {
                    edge.kind
                } else {
                    EdgeKind::Dependency
                };
                graph.connect(&edge.source, &target, kind);
            }
            for descendant in graph.descendants(id) {
                graph.remove(&descendant);
            }
            graph.remove(id);
            Ok(())
        })
    }
}
