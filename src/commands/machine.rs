//! `plan`, `apply` and `healthcheck`, locally or on a server

use super::RunFailed;
use crate::Context;
use crate::cli::RunArgs;
use crate::rpc::{Client, MachineRequest, Mode, Run};
use crate::ui;
use anyhow::Result;
use declarative::builtin::is_structural;
use declarative::{Node, NodeValue, Notifier, Params, Pipeline, Stage, Status, Summary, health_checks};

pub fn run(ctx: &Context, mode: Mode, args: &RunArgs) -> Result<()> {
    let params = super::params(ctx, &args.source.params)?;
    let location = &args.source.location;
    if !ctx.quiet {
        ui::run_header(mode.stage(), location);
    }

    let summary = match ctx.settings.rpc_addr(args.rpc_addr.as_deref()) {
        Some(addr) => remote(ctx, mode, addr, location, params)?,
        None => local(ctx, mode, location, &params)?,
    };

    ui::summary(&summary);
    if summary.is_success() {
        Ok(())
    } else {
        Err(RunFailed(summary.to_string()).into())
    }
}

/// Prints a line for every leaf resource as it finishes
struct Progress {
    enabled: bool,
}

impl Notifier for Progress {
    fn post(&self, _stage: Stage, node: &Node) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if let NodeValue::Task(task) = node.value()
            && !is_structural(&task.kind)
            && let Some(status) = &task.status
        {
            ui::node_finished(node.id().as_str(), status);
        }
        Ok(())
    }
}

fn local(ctx: &Context, mode: Mode, location: &str, params: &Params) -> Result<Summary> {
    let progress = Progress {
        enabled: !ctx.quiet && mode != Mode::Healthcheck,
    };
    let pipeline = Pipeline::new().params(params).notifier(&progress);
    let execution = match mode {
        Mode::Plan => pipeline.plan(&ctx.cancel, location)?,
        Mode::Apply => pipeline.apply(&ctx.cancel, location)?,
        Mode::Healthcheck => pipeline.healthcheck(&ctx.cancel, location)?,
    };

    if mode == Mode::Healthcheck {
        for check in health_checks(&execution.graph) {
            ui::health(check.id.as_str(), check.health, &check.status);
        }
    } else if !ctx.quiet {
        for node in execution.graph.nodes() {
            if let NodeValue::Task(task) = node.value()
                && !is_structural(&task.kind)
                && let Some(status) = &task.status
            {
                ui::node_details(node.id().as_str(), status, ctx.verbose > 0);
            }
        }
    }
    Ok(execution.summary())
}

fn remote(ctx: &Context, mode: Mode, addr: &str, location: &str, params: Params) -> Result<Summary> {
    let client = Client::new(addr)?;
    let request = MachineRequest {
        location: location.to_string(),
        params,
    };
    let live = !ctx.quiet && mode != Mode::Healthcheck;
    let run = client.run(&ctx.cancel, mode, &request, |event| {
        if live
            && event.run == Run::Finished
            && let Some(details) = &event.details
            && !event.kind.as_deref().is_none_or(is_structural)
        {
            ui::node_finished(event.id.as_str(), &Status::from(details.clone()));
        }
    })?;

    for node in run.graph.nodes() {
        let remote = node.value();
        let (Some(status), Some(kind)) = (&remote.status, &remote.kind) else {
            continue;
        };
        if is_structural(kind) {
            continue;
        }
        match remote.health {
            Some(health) if mode == Mode::Healthcheck => ui::health(node.id().as_str(), health, status),
            _ if !ctx.quiet => ui::node_details(node.id().as_str(), status, ctx.verbose > 0),
            _ => {}
        }
    }
    Ok(run.summary)
}
