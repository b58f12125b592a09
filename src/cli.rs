use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keel")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative machine configuration", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Settings file (default: <config dir>/keel/config.toml)
    #[arg(long, global = true, env = "KEEL_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan(RunArgs),

    /// Converge the machine to the configuration
    Apply(RunArgs),

    /// Report the health of every resource
    Healthcheck(RunArgs),

    /// Check the syntax of configuration files
    Check {
        /// Files to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Load a configuration and validate its graph
    Validate(SourceArgs),

    /// Print the prepared graph in Graphviz DOT format
    Graph(SourceArgs),

    /// Rewrite configuration files in canonical form
    Fmt {
        /// Only report files that are not formatted
        #[arg(long)]
        check: bool,

        /// Files or directories
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,
    },

    /// Print version information
    Version,

    /// Check that a server is reachable
    Ping(RemoteArgs),

    /// Serve plan and apply over HTTP
    Server {
        /// Address to listen on (default from settings)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
}

// ============================================================================
// Shared arguments
// ============================================================================

/// Parameters for the root of a configuration
#[derive(Args, Debug, Clone, Default)]
pub struct ParamArgs {
    /// Set a parameter (repeatable)
    #[arg(long = "params", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Parameters as a JSON object
    #[arg(long = "paramsJSON", value_name = "JSON")]
    pub params_json: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Configuration file or URL
    pub location: String,

    #[command(flatten)]
    pub params: ParamArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Run on a remote server instead of locally
    #[arg(long, env = "KEEL_RPC_ADDR", value_name = "URL")]
    pub rpc_addr: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    /// Server address (default from settings)
    #[arg(long, env = "KEEL_RPC_ADDR", value_name = "URL")]
    pub rpc_addr: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_repeated_params() {
        let cli = Cli::parse_from([
            "keel",
            "plan",
            "main.toml",
            "--params",
            "a=1",
            "--params",
            "b=two",
            "--paramsJSON",
            r#"{"c": true}"#,
        ]);
        let Command::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        assert_eq!(args.source.location, "main.toml");
        assert_eq!(args.source.params.params, ["a=1", "b=two"]);
        assert_eq!(args.source.params.params_json.as_deref(), Some(r#"{"c": true}"#));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["keel", "validate", "main.toml", "-vv", "--config", "/tmp/k.toml"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/k.toml")));
    }

    #[test]
    fn test_fmt_defaults_to_current_dir() {
        let cli = Cli::parse_from(["keel", "fmt", "--check"]);
        let Command::Fmt { check, paths } = cli.command else {
            panic!("expected fmt");
        };
        assert!(check);
        assert_eq!(paths, [PathBuf::from(".")]);
    }
}
