//! Leaf resources shipped with keel
//!
//! Each resource is a [`Preparer`] decoded from its configuration block and
//! a [`Task`] holding the rendered values:
//!
//! - `file.content` / `file.directory` - files and directories
//! - `task` - a check script and an apply script
//! - `task.query` - a read-only script whose output other nodes can `lookup`
//! - `user-error` - fails the run with a message
//!
//! [`Preparer`]: declarative::Preparer
//! [`Task`]: declarative::Task

pub mod file;
pub mod task;
pub mod user_error;

pub use file::{FileContent, FileDirectory};
pub use task::{Query, Script};
pub use user_error::UserError;

use declarative::Registry;
use std::path::PathBuf;

/// Structural resources plus every leaf resource
pub fn registry() -> Registry {
    let mut registry = Registry::with_builtins();
    registry
        .register::<FileContent>("file.content")
        .register::<FileDirectory>("file.directory")
        .register::<Script>("task")
        .register::<Query>("task.query")
        .register::<UserError>("user-error");
    registry
}

/// Make [`registry`] the process-wide registry
pub fn install() {
    if registry().install().is_err() {
        log::debug!("resource registry already installed");
    }
}

/// Expand `~` in a configured path
pub(crate) fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_kinds() {
        let registry = registry();
        for kind in ["file.content", "file.directory", "task", "task.query", "user-error", "param"] {
            assert!(registry.contains(kind), "{kind} not registered");
        }
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand("~/x"), home.join("x"));
        }
        assert_eq!(expand("/etc/motd"), PathBuf::from("/etc/motd"));
    }
}
