//! Named locks
//!
//! A block with `lock = "<name>"` becomes a member of that lock. The first
//! member seen adds `root/lock.lock.<name>` and `root/lock.unlock.<name>`;
//! every member depends on the former and is depended on by the latter.
//! The members themselves are chained when groups are serialized.

use crate::ast::{AstNode, Block};
use crate::builtin::{LOCK, UNLOCK};
use crate::error::{Error, Result};
use crate::metadata;
use crate::value::{Graph, Node, NodeValue};
use dag::{EdgeKind, NodeId};
use log::debug;
use serde_json::json;

pub fn inject_locks(graph: &Graph) -> Result<()> {
    let root = graph.root()?;

    for node in graph.nodes() {
        let id = node.id();
        let NodeValue::Ast(block) = node.value() else {
            continue;
        };
        if !matches!(block.kind.as_str(), LOCK | UNLOCK) {
            if let Some(name) = block.get_string(metadata::LOCK)? {
                join(graph, &root, id, name)?;
            }
        }
    }
    Ok(())
}

fn join(graph: &Graph, root: &NodeId, member: &NodeId, name: &str) -> Result<()> {
    if name.is_empty() || name.contains(dag::SEPARATOR) {
        return Err(Error::invalid(member, format!("invalid lock name {name:?}")));
    }
    let entry = ensure(graph, root, LOCK, name)?;
    let exit = ensure(graph, root, UNLOCK, name)?;

    debug!("{member} holds lock {name:?}");
    graph.add_metadata(member, metadata::LOCK, json!(name))?;
    graph.connect(member, &entry, EdgeKind::Dependency);
    graph.connect(&exit, member, EdgeKind::Dependency);
    Ok(())
}

fn ensure(graph: &Graph, root: &NodeId, kind: &str, name: &str) -> Result<NodeId> {
    let block = Block::new(kind, name);
    let id = root.child(&block.segment());
    if graph.contains(&id) {
        return Ok(id);
    }
    let mut node = Node::new(id.clone(), NodeValue::Ast(block));
    node.add_metadata(metadata::KIND, json!(kind))?;
    node.add_metadata(metadata::NAME, json!(name))?;
    graph.add_child(root, node);
    Ok(id)
}
