//! Run summaries

use crate::builtin::is_structural;
use crate::planner::Execution;
use crate::status::{Health, Status};
use crate::value::{Graph, NodeValue};
use dag::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Counts of a plan or apply run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Failed nodes and their error
    pub errors: BTreeMap<NodeId, String>,
    /// Resources that will change (plan) or changed (apply)
    pub changes: Vec<NodeId>,
    /// Nodes whose references never resolved
    pub unresolved: Vec<NodeId>,
    /// Resources that never ran because a dependency failed
    #[serde(default)]
    pub skipped: Vec<NodeId>,
}

impl Summary {
    pub fn from_execution(execution: &Execution) -> Self {
        let mut summary = Self::from_graph(&execution.graph);
        if let Some(failures) = &execution.failures {
            for failure in failures.iter() {
                summary
                    .errors
                    .entry(failure.id.clone())
                    .or_insert_with(|| format!("{:#}", failure.error));
            }
        }
        summary.unresolved.clone_from(&execution.unresolved);
        summary
    }

    /// Counts taken from the statuses stored in `graph`
    pub fn from_graph(graph: &Graph) -> Self {
        let mut summary = Self::default();
        for node in graph.nodes() {
            let id = node.id().clone();
            match node.value() {
                NodeValue::Tombstone(status) if status.is_skipped() => {
                    if node.metadata_str(crate::metadata::KIND).is_some_and(|k| !is_structural(k)) {
                        summary.skipped.push(id);
                    }
                }
                NodeValue::Tombstone(status) => {
                    summary.errors.insert(id, error_text(status));
                }
                NodeValue::Task(task) => {
                    let Some(status) = &task.status else {
                        continue;
                    };
                    if status.is_skipped() {
                        if !is_structural(&task.kind) {
                            summary.skipped.push(id);
                        }
                    } else if status.is_fatal() {
                        summary.errors.insert(id, error_text(status));
                    } else if status.has_changes() && !is_structural(&task.kind) {
                        summary.changes.push(id);
                    }
                }
                _ => {}
            }
        }
        summary
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.unresolved.is_empty()
    }
}

fn error_text(status: &Status) -> String {
    status
        .error
        .clone()
        .unwrap_or_else(|| status.level.to_string())
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error{}, {} change{}",
            self.error_count(),
            if self.error_count() == 1 { "" } else { "s" },
            self.change_count(),
            if self.change_count() == 1 { "" } else { "s" },
        )
    }
}

/// One resource in a health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub id: NodeId,
    pub health: Health,
    pub status: Status,
}

/// Health of every checked resource, structural kinds left out
pub fn health_checks(graph: &Graph) -> Vec<HealthCheck> {
    graph
        .nodes()
        .into_iter()
        .filter_map(|node| {
            let (kind, status) = match node.value() {
                NodeValue::Task(task) => (Some(task.kind.as_str()), task.status.clone()?),
                NodeValue::Tombstone(status) => {
                    (node.metadata_str(crate::metadata::KIND), status.clone())
                }
                _ => return None,
            };
            // a node without a kind was never a resource block
            if kind.is_none_or(is_structural) {
                return None;
            }
            Some(HealthCheck {
                id: node.id().clone(),
                health: status.health(),
                status,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::Noop;
    use crate::status::{Diff, Level};
    use crate::value::TaskNode;
    use dag::Node;
    use std::sync::Arc;

    fn task(kind: &str, status: Status) -> NodeValue {
        NodeValue::Task(TaskNode::new(kind, Arc::new(Noop::new())).with_status(status))
    }

    fn sample() -> Graph {
        let graph = Graph::new();
        let mut changed = Status::no_change();
        changed.add_difference("content", Diff::new("a", "b"));
        graph.add(Node::new(NodeId::root(), task("root", Status::new(Level::WillChange))));
        graph.add_child(&NodeId::root(), Node::new("root/file.content.a", task("file.content", changed)));
        graph.add_child(&NodeId::root(), Node::new("root/task.b", task("task", Status::fatal("boom"))));
        graph.add_child(&NodeId::root(), Node::new("root/task.c", task("task", Status::no_change())));
        graph.add_child(
            &NodeId::root(),
            Node::new("root/param.p", NodeValue::Tombstone(Status::fatal("`p` param is required"))),
        );
        graph
    }

    #[test]
    fn test_counts() {
        let summary = Summary::from_graph(&sample());
        assert_eq!(summary.to_string(), "2 errors, 1 change");
        assert_eq!(summary.changes, vec![NodeId::from("root/file.content.a")]);
        assert_eq!(summary.errors[&NodeId::from("root/task.b")], "boom");
        assert!(!summary.is_success());
    }

    #[test]
    fn test_skipped_are_neither_errors_nor_changes() {
        let graph = Graph::new();
        graph.add(Node::new(NodeId::root(), task("root", Status::skipped())));
        graph.add_child(&NodeId::root(), Node::new("root/task.b", task("task", Status::skipped())));
        let mut deferred = Node::new("root/task.c", NodeValue::Tombstone(Status::skipped()));
        deferred
            .add_metadata(crate::metadata::KIND, serde_json::json!("task"))
            .unwrap();
        graph.add_child(&NodeId::root(), deferred);

        let summary = Summary::from_graph(&graph);
        assert_eq!(summary.to_string(), "0 errors, 0 changes");
        assert_eq!(summary.skipped, [NodeId::from("root/task.b"), NodeId::from("root/task.c")]);

        let checks = health_checks(&graph);
        assert_eq!(checks.len(), 2);
        assert!(checks.iter().all(|c| c.health == Health::Warning));
    }

    #[test]
    fn test_empty() {
        let summary = Summary::default();
        assert_eq!(summary.to_string(), "0 errors, 0 changes");
        assert!(summary.is_success());
    }

    #[test]
    fn test_health_checks_skip_structural() {
        let mut checks = health_checks(&sample());
        checks.sort_by(|a, b| a.id.cmp(&b.id));
        let ids: Vec<&str> = checks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["root/file.content.a", "root/task.b", "root/task.c"]);
        assert_eq!(checks[0].health, Health::Warning);
        assert_eq!(checks[1].health, Health::Error);
        assert_eq!(checks[2].health, Health::Healthy);
    }

    #[test]
    fn test_health_checks_report_failed_leaves() {
        let graph = sample();
        let mut failed = Node::new(
            "root/file.content.d",
            NodeValue::Tombstone(Status::fatal("destination must be absolute")),
        );
        failed
            .add_metadata(crate::metadata::KIND, serde_json::json!("file.content"))
            .unwrap();
        graph.add_child(&NodeId::root(), failed);

        let checks = health_checks(&graph);
        let failed = checks
            .iter()
            .find(|c| c.id.as_str() == "root/file.content.d")
            .unwrap();
        assert_eq!(failed.health, Health::Error);
        assert!(!checks.iter().any(|c| c.id.as_str() == "root/param.p"));
    }
}
