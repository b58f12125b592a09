//! Plan stage: check every task against the system
//!
//! Tasks are checked leaves first, in parallel where the graph allows.
//! Thunks left behind by the render stage are forced once their
//! dependencies have run. A node that fails keeps its status in the graph;
//! nodes that depend on it are skipped.

use crate::context::{Notifier, Stage};
use crate::error::Result;
use crate::render::{Renderer, is_unresolvable};
use crate::status::Status;
use crate::summary::Summary;
use crate::value::{Graph, Node, NodeValue, TaskNode};
use dag::{Context, NodeErrors, NodeId};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// A graph after a plan or apply run
#[derive(Debug)]
pub struct Execution {
    pub graph: Graph,
    /// Nodes that failed, if any
    pub failures: Option<NodeErrors>,
    /// Nodes whose references never resolved
    pub unresolved: Vec<NodeId>,
}

impl Execution {
    pub fn summary(&self) -> Summary {
        Summary::from_execution(self)
    }

    /// No node failed and every node resolved
    pub fn is_success(&self) -> bool {
        self.failures.is_none() && self.unresolved.is_empty()
    }
}

/// What a stage does with one task
///
/// Returns the status to store and, for apply, the check taken before it.
pub(crate) type Step<'s> =
    dyn Fn(&Context, &Renderer<'_>, &TaskNode) -> (Status, Option<Status>) + Sync + 's;

/// Check every task without changing anything
pub fn plan(ctx: &Context, graph: &Graph, notifier: &dyn Notifier) -> Result<Execution> {
    info!("planning {} nodes", graph.len());
    run_stage(ctx, graph, Stage::Plan, notifier, &|ctx, render, task| {
        (check(ctx, render, task), None)
    })
}

pub(crate) fn check(ctx: &Context, render: &Renderer<'_>, task: &TaskNode) -> Status {
    task.task
        .check(ctx, render)
        .unwrap_or_else(|err| Status::fatal(format!("{err:#}")))
}

/// Walk a copy of `graph`, running `step` on every task
///
/// The copy is returned even when nodes fail, so every status can be
/// reported. Only cancellation and structural errors abort.
pub(crate) fn run_stage(
    ctx: &Context,
    graph: &Graph,
    stage: Stage,
    notifier: &dyn Notifier,
    step: &Step<'_>,
) -> Result<Execution> {
    let out = graph.copy();
    let unresolved = Mutex::new(Vec::new());
    let visited = Mutex::new(HashSet::new());

    let walked = out.walk(ctx, |id, node| {
        visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone());
        notifier.pre(stage, node)?;
        let stored = visit(ctx, &out, id, node, step, &unresolved);
        if let Some(current) = out.get(id) {
            notifier.post(stage, &current)?;
        }
        stored
    });

    let failures = match walked {
        Ok(()) => None,
        Err(dag::Error::Walk(errors)) => Some(errors),
        Err(err) => return Err(err.into()),
    };
    out.validate()?;
    if failures.is_some() {
        let visited = visited.into_inner().unwrap_or_else(PoisonError::into_inner);
        mark_skipped(&out, stage, notifier, &visited);
    }

    let mut unresolved = unresolved.into_inner().unwrap_or_else(PoisonError::into_inner);
    unresolved.sort();
    if let Some(failures) = &failures {
        info!("{stage} finished with {} failed nodes", failures.len());
    }
    Ok(Execution {
        graph: out,
        failures,
        unresolved,
    })
}

/// Give every node the walk never reached a skipped status
fn mark_skipped(graph: &Graph, stage: Stage, notifier: &dyn Notifier, visited: &HashSet<NodeId>) {
    for node in graph.nodes() {
        if visited.contains(node.id()) {
            continue;
        }
        debug!("{}: skipped", node.id());
        if let Err(err) = notifier.pre(stage, &node) {
            warn!("{}: {err:#}", node.id());
        }
        let value = match node.value() {
            NodeValue::Task(task) => NodeValue::Task(task.with_status(Status::skipped())),
            _ => NodeValue::Tombstone(Status::skipped()),
        };
        let skipped = node.with_value(value);
        graph.add(skipped.clone());
        if let Err(err) = notifier.post(stage, &skipped) {
            warn!("{}: {err:#}", node.id());
        }
    }
}

fn visit(
    ctx: &Context,
    graph: &Graph,
    id: &NodeId,
    node: &Node,
    step: &Step<'_>,
    unresolved: &Mutex<Vec<NodeId>>,
) -> anyhow::Result<()> {
    let renderer = Renderer::new(graph, id.clone());

    let task = match node.value() {
        NodeValue::Task(task) => task.clone(),
        NodeValue::Thunk(thunk) => match thunk.force(ctx, &renderer) {
            Ok(task) => TaskNode::new(thunk.kind(), task),
            Err(err) if is_unresolvable(&err) => {
                warn!("{id}: {err:#}");
                unresolved
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(id.clone());
                return Ok(());
            }
            Err(err) => {
                graph.add(node.with_value(NodeValue::Tombstone(Status::fatal(format!("{err:#}")))));
                return Err(err);
            }
        },
        NodeValue::Tombstone(status) => {
            anyhow::bail!("{}", status.error.as_deref().unwrap_or("failed earlier"))
        }
        other => anyhow::bail!("{id} is still a {}, it was never rendered", other.stage()),
    };

    let (mut status, plan) = step(ctx, &renderer, &task);
    let failed = status.is_fatal();
    debug!("{id}: {}", status.level);

    for child in graph.children(id) {
        if let Some(level) = graph
            .get(&child)
            .and_then(|child| child.value().status().map(|s| s.level))
        {
            status.raise(level);
        }
    }

    let mut task = task.with_status(status.clone());
    task.plan = plan;
    graph.add(node.with_value(NodeValue::Task(task)));

    if failed {
        anyhow::bail!(
            "{}",
            status.error.unwrap_or_else(|| format!("{} failed", id))
        );
    }
    Ok(())
}
