use super::Noop;
use crate::ast::Block;
use crate::render::Renderer;
use crate::resource::{FromBlock, Preparer, Task};
use dag::Context;

/// Entry node of a named lock
pub const LOCK: &str = "lock.lock";

/// Exit node of a named lock
pub const UNLOCK: &str = "lock.unlock";

/// Either end of a named lock
///
/// Mutual exclusion comes from the edges the loader and the group
/// serialization put around the lock's members; the nodes only mark where
/// the lock is taken and released.
#[derive(Debug)]
pub struct LockPreparer {
    entry: bool,
    name: String,
}

impl FromBlock for LockPreparer {
    fn from_block(block: &Block) -> anyhow::Result<Self> {
        Ok(Self {
            entry: block.kind == LOCK,
            name: block.name.clone(),
        })
    }
}

impl Preparer for LockPreparer {
    fn prepare(&self, _ctx: &Context, _render: &Renderer<'_>) -> anyhow::Result<Box<dyn Task>> {
        let verb = if self.entry { "acquired" } else { "released" };
        Ok(Box::new(Noop::with_message(format!(
            "lock {:?} {verb}",
            self.name
        ))))
    }
}
