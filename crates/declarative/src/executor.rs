//! Apply stage: converge the system
//!
//! Same traversal as the plan stage. Each task is checked again against
//! the live system, applied when the check reports changes, and checked a
//! last time to make sure the change took.

use crate::context::{Notifier, Stage};
use crate::error::Result;
use crate::planner::{Execution, check, run_stage};
use crate::render::Renderer;
use crate::status::{Level, Status};
use crate::value::{Graph, TaskNode};
use dag::Context;
use log::{debug, info};

/// Apply every task that has changes
pub fn apply(ctx: &Context, graph: &Graph, notifier: &dyn Notifier) -> Result<Execution> {
    info!("applying {} nodes", graph.len());
    run_stage(ctx, graph, Stage::Apply, notifier, &|ctx, render, task| {
        let before = check(ctx, render, task);
        let after = converge(ctx, render, task, &before);
        (after, Some(before))
    })
}

fn converge(ctx: &Context, render: &Renderer<'_>, task: &TaskNode, before: &Status) -> Status {
    if before.is_fatal() {
        return before.clone();
    }
    if before.level == Level::CantChange {
        let mut status = before.clone();
        status.set_error("resource is out of date but cannot be changed");
        return status;
    }
    if !before.has_changes() {
        return before.clone();
    }

    debug!("{}: applying", render.id());
    let mut status = match task.task.apply(ctx) {
        Ok(status) => status,
        Err(err) => return Status::fatal(format!("{err:#}")),
    };
    if status.is_fatal() {
        return status;
    }
    if status.differences.is_empty() {
        status.differences.clone_from(&before.differences);
    }
    status.raise(Level::WillChange);

    let verify = check(ctx, render, task);
    if verify.is_fatal() {
        status.set_error(format!(
            "check after apply failed: {}",
            verify.error.as_deref().unwrap_or("unknown error")
        ));
    } else if verify.has_changes() {
        let fields: Vec<&str> = verify
            .differences
            .iter()
            .filter(|(_, diff)| diff.changes())
            .map(|(field, _)| field.as_str())
            .collect();
        status.set_error(format!(
            "resource did not converge: still differs in {}",
            if fields.is_empty() { "state".to_string() } else { fields.join(", ") }
        ));
    }
    status
}
