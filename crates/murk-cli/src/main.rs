//! Murk CLI - command-line interface for the Murk taint analyzer
//!
//! Loads a Module Dependency Graph exported as CSV, runs the taint
//! detectors against it, and writes the taint summary.

mod commands;

use clap::Parser;
use commands::Commands;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "murk",
    author,
    version,
    about = "Graph-based taint analysis for JavaScript/Node.js",
    long_about = "Murk analyzes a Module Dependency Graph (MDG) produced by an\n\
                  external JavaScript parser and reports injection and\n\
                  prototype-pollution flows, together with reconstructed\n\
                  attacker-controlled parameter shapes and call paths."
)]
pub struct Cli {
    /// Log verbosely (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Scan(args) => args.run(),
        Commands::Explain(args) => args.run(),
    }
}
