//! Switch and case
//!
//! A `switch` holds `case` children, each with a `predicate` template. At
//! check time the first case, in declaration order, whose predicate renders
//! to `true` is the active one. Resources under any other case are pruned:
//! they report no change and never run.

use crate::builtin::{CASE, SWITCH};
use crate::error::{Error, Result};
use crate::metadata;
use crate::render::Renderer;
use crate::resource::{Fields, Preparer, Task};
use crate::status::Status;
use crate::value::{Graph, NodeValue};
use dag::{Context, NodeId};
use log::{debug, info};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};

const PRUNED: &str = "pruned branch not executing task";

pub fn resolve_conditionals(ctx: &Context, graph: &Graph) -> Result<Graph> {
    info!("resolving conditionals");
    let out = graph.copy();

    for node in out.nodes() {
        ctx.check()?;
        let id = node.id();
        match node.metadata_str(metadata::KIND) {
            Some(SWITCH) => {
                let cases = ordered_cases(&out, id);
                if cases.len() != out.children(id).len() {
                    return Err(Error::invalid(id, "a switch may only contain cases"));
                }
                let default = id.child(&format!("{CASE}.{}", crate::builtin::DEFAULT));
                if let Some(position) = cases.iter().position(|case| case == &default)
                    && position + 1 != cases.len()
                {
                    return Err(Error::invalid(id, "the default case must come last"));
                }
            }
            Some(CASE) => {
                let parent_kind = id
                    .parent()
                    .and_then(|parent| out.get(&parent))
                    .and_then(|parent| parent.metadata_str(metadata::KIND).map(str::to_string));
                if parent_kind.as_deref() != Some(SWITCH) {
                    return Err(Error::invalid(id, "a case must be inside a switch"));
                }
                let NodeValue::Ast(block) = node.value() else {
                    continue;
                };
                let Some(toml::Value::String(predicate)) = block.attrs.get(metadata::PREDICATE)
                else {
                    return Err(Error::Attribute {
                        id: id.to_string(),
                        key: metadata::PREDICATE.to_string(),
                        expected: "a string",
                    });
                };
                out.add_metadata(id, metadata::PREDICATE, json!(predicate))?;
            }
            _ => {
                if let Some(case) = enclosing_case(&out, id) {
                    debug!("{id} is conditional on {case}");
                    out.add_metadata(id, metadata::CONDITIONAL_CASE, json!(case.as_str()))?;
                }
            }
        }
    }

    out.validate()?;
    Ok(out)
}

/// Cases of a switch in declaration order
fn ordered_cases(graph: &Graph, switch: &NodeId) -> Vec<NodeId> {
    let mut cases: Vec<(u64, NodeId)> = graph
        .children(switch)
        .into_iter()
        .filter_map(|child| {
            let node = graph.get(&child)?;
            (node.metadata_str(metadata::KIND) == Some(CASE)).then(|| {
                let order = node
                    .get_metadata(metadata::ORDER)
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(u64::MAX);
                (order, child)
            })
        })
        .collect();
    cases.sort();
    cases.into_iter().map(|(_, id)| id).collect()
}

/// The nearest case above `id`
fn enclosing_case(graph: &Graph, id: &NodeId) -> Option<NodeId> {
    id.ancestors().find(|ancestor| {
        graph
            .get(ancestor)
            .is_some_and(|node| node.metadata_str(metadata::KIND) == Some(CASE))
    })
}

/// Whether `case` is the active case of its switch, and every case above
/// it is active too
pub fn case_active(graph: &Graph, case: &NodeId) -> anyhow::Result<bool> {
    let Some(switch) = case.parent() else {
        return Ok(false);
    };

    let mut winner = None;
    for candidate in ordered_cases(graph, &switch) {
        let predicate = graph
            .get(&candidate)
            .and_then(|node| node.metadata_str(metadata::PREDICATE).map(str::to_string))
            .unwrap_or_default();
        let rendered = Renderer::new(graph, candidate.clone()).render(metadata::PREDICATE, &predicate)?;
        if rendered.trim() == "true" {
            winner = Some(candidate);
            break;
        }
    }
    if winner.as_ref() != Some(case) {
        return Ok(false);
    }

    match enclosing_case(graph, &switch) {
        Some(outer) => case_active(graph, &outer),
        None => Ok(true),
    }
}

/// A resource under a case
#[derive(Debug)]
pub struct ConditionalPreparer {
    pub case: NodeId,
    pub inner: Arc<dyn Preparer>,
}

impl Preparer for ConditionalPreparer {
    fn prepare(&self, ctx: &Context, render: &Renderer<'_>) -> anyhow::Result<Box<dyn Task>> {
        let inner = if case_active(render.graph(), &self.case)? {
            Some(Arc::from(self.inner.prepare(ctx, render)?))
        } else {
            debug!("{}: inactive branch, not preparing", render.id());
            None
        };
        Ok(Box::new(ConditionalTask {
            case: self.case.clone(),
            inner,
            active: Mutex::new(false),
        }))
    }

    fn group(&self) -> Option<String> {
        self.inner.group()
    }
}

/// A task that only runs while its case is active
///
/// The decision is taken at check time and reused by the apply that
/// follows.
#[derive(Debug)]
pub struct ConditionalTask {
    case: NodeId,
    inner: Option<Arc<dyn Task>>,
    active: Mutex<bool>,
}

impl ConditionalTask {
    fn pruned(stage: &str) -> Status {
        Status::no_change().with_output(format!("{stage}: {PRUNED}"))
    }
}

impl Task for ConditionalTask {
    fn check(&self, ctx: &Context, render: &Renderer<'_>) -> anyhow::Result<Status> {
        let active = case_active(render.graph(), &self.case)?;
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = active;
        match &self.inner {
            Some(inner) if active => inner.check(ctx, render),
            _ => Ok(Self::pruned("Check")),
        }
    }

    fn apply(&self, ctx: &Context) -> anyhow::Result<Status> {
        let active = *self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match &self.inner {
            Some(inner) if active => inner.apply(ctx),
            _ => Ok(Self::pruned("Apply")),
        }
    }

    fn exported_fields(&self) -> Fields {
        self.inner
            .as_ref()
            .map(|inner| inner.exported_fields())
            .unwrap_or_default()
    }
}
