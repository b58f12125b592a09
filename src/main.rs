mod cli;
mod commands;
mod config;
mod resource;
mod rpc;
mod runner;
mod ui;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use commands::RunFailed;
use config::Settings;
use declarative::Context as RunContext;
use rpc::Mode;
use std::process::ExitCode;

/// Exit code after an interrupt
const INTERRUPTED: u8 = 130;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub settings: Settings,
    /// Cancelled on the first Ctrl-C
    pub cancel: RunContext,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .parse_default_env()
        .format_timestamp(None)
        .init();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            ui::error(&format!("{err:#}"));
            return ExitCode::FAILURE;
        }
    };
    resource::install();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        settings,
        cancel: RunContext::new(),
    };
    watch_interrupts(ctx.cancel.clone());

    match dispatch(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) if ctx.cancel.is_cancelled() => {
            ui::error("cancelled");
            ExitCode::from(INTERRUPTED)
        }
        Err(err) if err.is::<RunFailed>() => ExitCode::FAILURE,
        Err(err) => {
            ui::error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Plan(args) => commands::machine::run(ctx, Mode::Plan, &args),
        Command::Apply(args) => commands::machine::run(ctx, Mode::Apply, &args),
        Command::Healthcheck(args) => commands::machine::run(ctx, Mode::Healthcheck, &args),
        Command::Check { files } => commands::source::check(ctx, &files),
        Command::Validate(args) => commands::source::validate(ctx, &args),
        Command::Graph(args) => commands::graph::run(ctx, &args),
        Command::Fmt { check, paths } => commands::source::fmt(ctx, check, &paths),
        Command::Version => {
            commands::server::version();
            Ok(())
        }
        Command::Ping(args) => commands::server::ping(ctx, &args),
        Command::Server { bind } => commands::server::serve(ctx, bind.as_deref()),
    }
}

/// First Ctrl-C cancels the run, the second exits immediately
fn watch_interrupts(cancel: RunContext) {
    let spawned = std::thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    log::warn!("Ctrl-C handling unavailable: {err}");
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                ui::warn("interrupted, stopping (Ctrl-C again to exit now)");
                cancel.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(i32::from(INTERRUPTED));
                }
            });
        });
    if let Err(err) = spawned {
        log::warn!("Ctrl-C handling unavailable: {err}");
    }
}
