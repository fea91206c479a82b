//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Evaluate feature flags for arbitrary contexts
#[derive(Parser, Debug)]
#[command(name = "context-tester")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CONTEXT_TESTER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CONTEXT_TESTER_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "CONTEXT_TESTER_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CONTEXT_TESTER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CONTEXT_TESTER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the web server (default)
    Serve,

    /// Evaluate all flags for one context and print the result
    Evaluate(EvaluateArgs),
}

/// Arguments of `evaluate`
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Project key
    #[arg(long)]
    pub project: String,

    /// Environment key
    #[arg(long)]
    pub environment: String,

    /// Context as inline JSON, or `@path` to read it from a file
    #[arg(long)]
    pub context: String,

    /// Management API access token
    #[arg(long, env = "CONTEXT_TESTER_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,

    /// Print the raw flags state as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_server_mode() {
        let cli = Cli::try_parse_from(["context-tester"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn parses_evaluate() {
        let cli = Cli::try_parse_from([
            "context-tester",
            "evaluate",
            "--project",
            "default",
            "--environment",
            "production",
            "--context",
            r#"{"key":"u-1"}"#,
            "--access-token",
            "api-123",
            "--json",
        ])
        .unwrap();
        let Some(Command::Evaluate(args)) = cli.command else {
            panic!("expected evaluate");
        };
        assert_eq!(args.project, "default");
        assert_eq!(args.access_token, "api-123");
        assert!(args.json);
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
