//! `server`, `ping` and `version`

use crate::Context;
use crate::cli::RemoteArgs;
use crate::config::merge_params;
use crate::rpc::{AppState, Client, server};
use crate::{resource, ui};
use anyhow::{Context as _, Result, bail};

pub fn serve(ctx: &Context, bind: Option<&str>) -> Result<()> {
    let bind = bind.unwrap_or(ctx.settings.server.bind.as_str());
    let defaults = merge_params(&ctx.settings.params, None, &[])?;
    let state = AppState::new(resource::registry(), defaults).with_shutdown(ctx.cancel.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    if !ctx.quiet {
        ui::info(&format!("serving on {bind}, Ctrl-C to stop"));
    }
    runtime.block_on(server::serve(bind, state))
}

pub fn ping(ctx: &Context, args: &RemoteArgs) -> Result<()> {
    let Some(addr) = ctx.settings.rpc_addr(args.rpc_addr.as_deref()) else {
        bail!("No server address: pass --rpc-addr or set [client] rpc_addr");
    };
    let client = Client::new(addr)?;
    let reply = client.ping()?;
    let info = client.version()?;
    ui::success(&format!("{}: {reply}", client.base()));
    ui::kv("server", &format!("{} {}", info.name, info.version));
    Ok(())
}

pub fn version() {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
}
