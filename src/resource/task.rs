//! Script resources
//!
//! `task` runs its `check` script to decide whether anything needs doing: a
//! zero exit means the machine is already in shape. `apply` must then exit
//! zero. `task.query` only reads; its output is exported for `lookup`.

use crate::runner::{self, DEFAULT_INTERPRETER, Output};
use anyhow::{Result, bail};
use declarative::{Block, Context, Fields, FromBlock, Level, Preparer, Renderer, Status, Task};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// Where and how scripts run
#[derive(Debug, Default, Deserialize)]
struct Environment {
    #[serde(default)]
    interpreter: Option<String>,
    #[serde(default)]
    dir: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct Rendered {
    interpreter: String,
    dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl Environment {
    fn render(&self, render: &Renderer<'_>) -> Result<Rendered> {
        let interpreter = match &self.interpreter {
            Some(interpreter) => render.render("interpreter", interpreter)?,
            None => DEFAULT_INTERPRETER.to_string(),
        };
        let dir = match &self.dir {
            Some(dir) => Some(super::expand(&render.render("dir", dir)?)),
            None => None,
        };
        Ok(Rendered {
            interpreter,
            dir,
            env: render.render_map("env", &self.env)?,
        })
    }
}

impl Rendered {
    fn run(&self, ctx: &Context, body: &str) -> Result<Output> {
        runner::run_script(ctx, &runner::Script {
            interpreter: &self.interpreter,
            body,
            dir: self.dir.as_deref(),
            env: &self.env,
        })
    }
}

fn add_output(status: &mut Status, output: &Output) {
    for line in output.stdout.lines().chain(output.stderr.lines()) {
        status.add_output(line);
    }
}

// ============================================================================
// task
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Script {
    check: String,
    apply: String,
    #[serde(flatten)]
    environment: Environment,
}

impl FromBlock for Script {
    fn from_block(block: &Block) -> Result<Self> {
        block.decode()
    }
}

impl Preparer for Script {
    fn prepare(&self, _ctx: &Context, render: &Renderer<'_>) -> Result<Box<dyn Task>> {
        Ok(Box::new(ScriptTask {
            check: render.render("check", &self.check)?,
            apply: render.render("apply", &self.apply)?,
            environment: self.environment.render(render)?,
        }))
    }
}

#[derive(Debug)]
pub struct ScriptTask {
    check: String,
    apply: String,
    environment: Rendered,
}

impl Task for ScriptTask {
    fn check(&self, ctx: &Context, _render: &Renderer<'_>) -> Result<Status> {
        let output = self.environment.run(ctx, &self.check)?;
        let mut status = Status::no_change();
        add_output(&mut status, &output);
        if !output.success() {
            status.raise(Level::WillChange);
            status.add_message(format!("check exited with status {}", output.status));
        }
        Ok(status)
    }

    fn apply(&self, ctx: &Context) -> Result<Status> {
        let output = self.environment.run(ctx, &self.apply)?;
        if !output.success() {
            bail!(
                "apply exited with status {}: {}",
                output.status,
                output.stderr.trim()
            );
        }
        let mut status = Status::no_change();
        add_output(&mut status, &output);
        Ok(status)
    }
}

// ============================================================================
// task.query
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Query {
    query: String,
    #[serde(flatten)]
    environment: Environment,
}

impl FromBlock for Query {
    fn from_block(block: &Block) -> Result<Self> {
        block.decode()
    }
}

impl Preparer for Query {
    fn prepare(&self, _ctx: &Context, render: &Renderer<'_>) -> Result<Box<dyn Task>> {
        Ok(Box::new(QueryTask {
            query: render.render("query", &self.query)?,
            environment: self.environment.render(render)?,
            result: Mutex::new(None),
        }))
    }
}

#[derive(Debug)]
pub struct QueryTask {
    query: String,
    environment: Rendered,
    /// Output of the last run
    result: Mutex<Option<Output>>,
}

impl Task for QueryTask {
    fn check(&self, ctx: &Context, _render: &Renderer<'_>) -> Result<Status> {
        let output = self.environment.run(ctx, &self.query)?;
        let mut status = Status::no_change();
        add_output(&mut status, &output);
        if !output.success() {
            status.set_warning(format!("query exited with status {}", output.status));
        }
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(output);
        Ok(status)
    }

    fn apply(&self, _ctx: &Context) -> Result<Status> {
        Ok(Status::no_change())
    }

    fn exported_fields(&self) -> Fields {
        let result = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(output) = result.as_ref() else {
            return Fields::new();
        };
        Fields::from([
            ("stdout".to_string(), output.stdout.trim_end().into()),
            ("stderr".to_string(), output.stderr.trim_end().into()),
            ("status".to_string(), output.status.into()),
        ])
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use declarative::{Graph, Node, NodeId, NodeValue};

    fn graph() -> Graph {
        let graph = Graph::new();
        graph.add(Node::new(NodeId::root(), NodeValue::Tombstone(Status::no_change())));
        graph
    }

    #[test]
    fn test_task_check_and_apply() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        let block = Block::new("task", "touch")
            .with_attr("check", format!("test -f {}", marker.display()))
            .with_attr("apply", format!("touch {}", marker.display()));

        let graph = graph();
        let render = Renderer::new(&graph, NodeId::root());
        let task = Script::from_block(&block)
            .unwrap()
            .prepare(&Context::new(), &render)
            .unwrap();

        let status = task.check(&Context::new(), &render).unwrap();
        assert_eq!(status.level, Level::WillChange);
        task.apply(&Context::new()).unwrap();
        assert_eq!(task.check(&Context::new(), &render).unwrap().level, Level::NoChange);
    }

    #[test]
    fn test_task_apply_failure() {
        let block = Block::new("task", "fail")
            .with_attr("check", "exit 1")
            .with_attr("apply", "echo nope >&2; exit 2");
        let graph = graph();
        let render = Renderer::new(&graph, NodeId::root());
        let task = Script::from_block(&block)
            .unwrap()
            .prepare(&Context::new(), &render)
            .unwrap();
        let err = task.apply(&Context::new()).unwrap_err();
        assert_eq!(err.to_string(), "apply exited with status 2: nope");
    }

    #[test]
    fn test_query_exports_output() {
        let mut env = toml::Table::new();
        env.insert("NAME".into(), "keel".into());
        let block = Block::new("task.query", "q")
            .with_attr("query", "echo hello $NAME")
            .with_attr("env", env);
        let graph = graph();
        let render = Renderer::new(&graph, NodeId::root());
        let task = Query::from_block(&block)
            .unwrap()
            .prepare(&Context::new(), &render)
            .unwrap();

        assert!(task.exported_fields().is_empty());
        let status = task.check(&Context::new(), &render).unwrap();
        assert_eq!(status.output, ["hello keel"]);

        let fields = task.exported_fields();
        assert_eq!(fields["stdout"], "hello keel");
        assert_eq!(fields["status"], 0);
    }

    #[test]
    fn test_query_failure_is_a_warning() {
        let block = Block::new("task.query", "q").with_attr("query", "exit 4");
        let graph = graph();
        let render = Renderer::new(&graph, NodeId::root());
        let task = Query::from_block(&block)
            .unwrap()
            .prepare(&Context::new(), &render)
            .unwrap();
        let status = task.check(&Context::new(), &render).unwrap();
        assert!(!status.has_changes());
        assert_eq!(status.warning.as_deref(), Some("query exited with status 4"));
        assert_eq!(task.exported_fields()["status"], 4);
    }
}
