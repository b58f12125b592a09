//! Command implementations

pub mod graph;
pub mod machine;
pub mod server;
pub mod source;

use crate::cli::ParamArgs;
use crate::config;
use anyhow::Result;
use declarative::Params;

/// A run finished but reported failures
///
/// The failures have already been printed; `main` only sets the exit code.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RunFailed(pub String);

/// Root parameters for a command, settings included
pub(crate) fn params(ctx: &crate::Context, args: &ParamArgs) -> Result<Params> {
    config::merge_params(
        &ctx.settings.params,
        args.params_json.as_deref(),
        &args.params,
    )
}
