use super::Noop;
use crate::ast::Block;
use crate::render::Renderer;
use crate::resource::{FromBlock, Preparer, Task};
use dag::Context;
use serde::Deserialize;

pub const SWITCH: &str = "switch";
pub const CASE: &str = "case";

/// Case sugar that always matches; must come last in its switch
pub const DEFAULT: &str = "default";

/// A set of mutually exclusive cases
#[derive(Debug, Default)]
pub struct SwitchPreparer;

impl FromBlock for SwitchPreparer {
    fn from_block(_block: &Block) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

impl Preparer for SwitchPreparer {
    fn prepare(&self, _ctx: &Context, _render: &Renderer<'_>) -> anyhow::Result<Box<dyn Task>> {
        Ok(Box::new(Noop::new()))
    }
}

/// One branch of a switch
///
/// The predicate is evaluated by the conditional wrapper of each resource
/// under the case, not by the case itself.
#[derive(Debug, Deserialize)]
pub struct CasePreparer {
    pub predicate: String,
}

impl FromBlock for CasePreparer {
    fn from_block(block: &Block) -> anyhow::Result<Self> {
        block.decode()
    }
}

impl Preparer for CasePreparer {
    fn prepare(&self, _ctx: &Context, _render: &Renderer<'_>) -> anyhow::Result<Box<dyn Task>> {
        Ok(Box::new(Noop::new()))
    }
}
