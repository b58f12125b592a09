//! Structural resource kinds
//!
//! These kinds shape the graph rather than the system: they never report
//! changes of their own and are left out of change counts.

mod lock;
mod module;
mod param;
mod switch;

use crate::registry::Registry;
use crate::render::Renderer;
use crate::resource::Task;
use crate::status::Status;
use dag::Context;

pub use lock::{LOCK, LockPreparer, UNLOCK};
pub use module::ModulePreparer;
pub use param::{ParamPreparer, ParamTask};
pub use switch::{CASE, CasePreparer, DEFAULT, SWITCH, SwitchPreparer};

pub const ROOT: &str = "root";
pub const MODULE: &str = "module";
pub const PARAM: &str = "param";

/// Kinds that exist only to structure the graph
pub const STRUCTURAL: [&str; 7] = [ROOT, MODULE, PARAM, SWITCH, CASE, LOCK, UNLOCK];

pub fn is_structural(kind: &str) -> bool {
    STRUCTURAL.contains(&kind)
}

pub(crate) fn register(registry: &mut Registry) {
    registry
        .register::<ModulePreparer>(ROOT)
        .register::<ModulePreparer>(MODULE)
        .register::<ParamPreparer>(PARAM)
        .register::<SwitchPreparer>(SWITCH)
        .register::<CasePreparer>(CASE)
        .register::<LockPreparer>(LOCK)
        .register::<LockPreparer>(UNLOCK);
}

/// A task that is always in its desired state
#[derive(Debug, Clone)]
pub struct Noop {
    message: Option<String>,
}

impl Noop {
    pub fn new() -> Self {
        Self { message: None }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    fn status(&self) -> Status {
        let status = Status::no_change();
        match &self.message {
            Some(message) => status.with_message(message.clone()),
            None => status,
        }
    }
}

impl Default for Noop {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for Noop {
    fn check(&self, _ctx: &Context, _render: &Renderer<'_>) -> anyhow::Result<Status> {
        Ok(self.status())
    }

    fn apply(&self, _ctx: &Context) -> anyhow::Result<Status> {
        Ok(self.status())
    }
}
