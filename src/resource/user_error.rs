//! `user-error`: stop a run with a message
//!
//! Mostly useful inside a `switch`, to reject combinations of parameters the
//! configuration does not support.

use anyhow::Result;
use declarative::{Block, Context, FromBlock, Preparer, Renderer, Status, Task};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct UserError {
    error: String,
}

impl FromBlock for UserError {
    fn from_block(block: &Block) -> Result<Self> {
        block.decode()
    }
}

impl Preparer for UserError {
    fn prepare(&self, _ctx: &Context, render: &Renderer<'_>) -> Result<Box<dyn Task>> {
        Ok(Box::new(UserErrorTask(render.render("error", &self.error)?)))
    }
}

#[derive(Debug)]
pub struct UserErrorTask(String);

impl Task for UserErrorTask {
    fn check(&self, _ctx: &Context, _render: &Renderer<'_>) -> Result<Status> {
        Ok(Status::fatal(&self.0))
    }

    fn apply(&self, _ctx: &Context) -> Result<Status> {
        Ok(Status::fatal(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{Graph, Level, Node, NodeId, NodeValue};

    #[test]
    fn test_always_fatal() {
        let graph = Graph::new();
        graph.add(Node::new(NodeId::root(), NodeValue::Tombstone(Status::no_change())));
        let render = Renderer::new(&graph, NodeId::root());

        let block = Block::new("user-error", "unsupported").with_attr("error", "unsupported platform");
        let task = UserError::from_block(&block)
            .unwrap()
            .prepare(&Context::new(), &render)
            .unwrap();
        let status = task.check(&Context::new(), &render).unwrap();
        assert_eq!(status.level, Level::Fatal);
        assert_eq!(status.error.as_deref(), Some("unsupported platform"));
    }
}
