//! Serialization of resources that share a group or a lock

use crate::error::Result;
use crate::metadata;
use crate::value::{Graph, Node};
use dag::{Context, EdgeKind, NodeId};
use log::{debug, info};
use std::collections::HashMap;

/// Chain every set of nodes sharing a group key
///
/// Members are visited leaves first and each one is made to depend on the
/// member visited before it. An edge from a later node to an earlier one in
/// that order cannot close a cycle.
pub fn serialize_groups(ctx: &Context, graph: &Graph) -> Result<Graph> {
    info!("serializing groups");
    let out = graph.copy();
    let mut last: HashMap<String, NodeId> = HashMap::new();

    for id in out.topological_order()? {
        ctx.check()?;
        let Some(node) = out.get(&id) else {
            continue;
        };
        for key in group_keys(&node) {
            if let Some(previous) = last.insert(key.clone(), id.clone())
                && !previous.is_descendant_of(&id)
            {
                debug!("{key}: {id} runs after {previous}");
                out.connect(&id, &previous, EdgeKind::Dependency);
            }
        }
    }

    out.validate()?;
    Ok(out)
}

fn group_keys(node: &Node) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(group) = node.group() {
        keys.push(group.to_string());
    }
    if let Some(lock) = node.metadata_str(metadata::LOCK) {
        keys.push(format!("lock:{lock}"));
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Block;
    use crate::value::NodeValue;
    use serde_json::json;

    fn block(id: &str, group: Option<&str>) -> Node {
        let id = NodeId::from(id);
        let (kind, name) = id.base().split_once('.').unwrap_or(("task", id.base()));
        Node::new(id.clone(), NodeValue::Ast(Block::new(kind, name))).with_group(group.map(Into::into))
    }

    fn assert_ordered(graph: &Graph, members: &[&str]) {
        for a in members {
            for b in members {
                let (a, b) = (NodeId::from(*a), NodeId::from(*b));
                assert!(graph.reaches(&a, &b) || graph.reaches(&b, &a), "{a} and {b} unordered");
            }
        }
    }

    #[test]
    fn test_nested_members_do_not_cycle() {
        let graph = Graph::new();
        let root = NodeId::root();
        graph.add(Node::new(root.clone(), NodeValue::Ast(Block::new("root", "root"))));
        graph.add_child(&root, block("root/task.a", Some("g")));
        graph.add_child(&NodeId::from("root/task.a"), block("root/task.a/task.b", Some("g")));
        graph.add_child(&root, block("root/task.c", Some("g")));
        graph.add_child(&root, block("root/task.d", None));

        let out = serialize_groups(&Context::new(), &graph).unwrap();
        out.validate().unwrap();
        assert_ordered(&out, &["root/task.a", "root/task.a/task.b", "root/task.c"]);
        assert!(out.down_edges(&NodeId::from("root/task.d")).is_empty());
    }

    #[test]
    fn test_lock_members_are_chained() {
        let graph = Graph::new();
        let root = NodeId::root();
        graph.add(Node::new(root.clone(), NodeValue::Ast(Block::new("root", "root"))));
        for name in ["root/task.x", "root/task.y"] {
            let mut node = block(name, None);
            node.add_metadata(metadata::LOCK, json!("mylock")).unwrap();
            graph.add_child(&root, node);
        }

        let out = serialize_groups(&Context::new(), &graph).unwrap();
        assert_ordered(&out, &["root/task.x", "root/task.y"]);
    }
}
