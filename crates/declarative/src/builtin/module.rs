use super::Noop;
use crate::ast::Block;
use crate::render::Renderer;
use crate::resource::{FromBlock, Preparer, Task};
use dag::Context;

/// The root and every loaded module
///
/// Parameters supplied to a module are read from node metadata by the
/// module's `param` children, so the module itself carries nothing.
#[derive(Debug, Default)]
pub struct ModulePreparer;

impl FromBlock for ModulePreparer {
    fn from_block(_block: &Block) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

impl Preparer for ModulePreparer {
    fn prepare(&self, _ctx: &Context, _render: &Renderer<'_>) -> anyhow::Result<Box<dyn Task>> {
        Ok(Box::new(Noop::new()))
    }
}
