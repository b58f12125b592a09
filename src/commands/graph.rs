//! `graph`: the prepared graph as Graphviz DOT

use crate::Context;
use crate::cli::SourceArgs;
use anyhow::Result;
use dag::EdgeKind;
use declarative::{Graph, Pipeline};
use std::fmt::Write as _;

pub fn run(ctx: &Context, args: &SourceArgs) -> Result<()> {
    let params = super::params(ctx, &args.params)?;
    let graph = Pipeline::new()
        .params(&params)
        .prepare(&ctx.cancel, &args.location)?;
    print!("{}", to_dot(&graph));
    Ok(())
}

/// Containment edges are dashed, dependencies solid
pub fn to_dot(graph: &Graph) -> String {
    let mut out = String::from("digraph keel {\n  rankdir = LR;\n  node [shape = box];\n");
    for node in graph.nodes() {
        let id = node.id().as_str();
        let label = node.id().base();
        match node.group() {
            Some(group) => {
                let _ = writeln!(out, "  {id:?} [label = {:?}];", format!("{label}\n[{group}]"));
            }
            None => {
                let _ = writeln!(out, "  {id:?} [label = {label:?}];");
            }
        }
    }
    for edge in graph.edges() {
        let style = match edge.kind {
            EdgeKind::Parent => " [style = dashed]",
            EdgeKind::Dependency => "",
        };
        let _ = writeln!(out, "  {:?} -> {:?}{style};", edge.source.as_str(), edge.dest.as_str());
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{Block, Node, NodeId, NodeValue};

    #[test]
    fn test_dot() {
        let graph = Graph::new();
        graph.add(Node::new(NodeId::root(), NodeValue::Ast(Block::new("root", "root"))));
        graph.add_child(
            &NodeId::root(),
            Node::new("root/task.a", NodeValue::Ast(Block::new("task", "a"))),
        );
        graph.add_child(
            &NodeId::root(),
            Node::new("root/task.b", NodeValue::Ast(Block::new("task", "b")))
                .with_group(Some("apt".into())),
        );
        graph.connect(&NodeId::from("root/task.b"), &NodeId::from("root/task.a"), EdgeKind::Dependency);

        let dot = to_dot(&graph);
        assert!(dot.starts_with("digraph keel {"));
        assert!(dot.contains(r#"  "root/task.a" [label = "task.a"];"#));
        assert!(dot.contains(r#"  "root/task.b" [label = "task.b\n[apt]"];"#));
        assert!(dot.contains(r#"  "root" -> "root/task.a" [style = dashed];"#));
        assert!(dot.contains(r#"  "root/task.b" -> "root/task.a";"#));
        assert!(dot.ends_with("}\n"));
    }
}
