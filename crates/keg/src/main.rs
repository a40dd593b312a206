//! Keg CLI - knowledge base tooling.
//!
//! Provides commands for:
//! - `search`: Ranked search across one or more kegs
//! - `index`: Rebuild the dex artifacts of a keg, optionally on every change
//! - `nodes`: List the nodes of a keg

mod commands;
mod context;
mod error;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{IndexArgs, NodesArgs, SearchArgs};
use context::Context;
use output::Output;

/// Keg - numbered markdown notes with derived indexes.
#[derive(Parser)]
#[command(name = "keg", version, about)]
struct Cli {
    /// Path to configuration file (default: auto-discover kegs.toml).
    #[arg(short, long, global = true, env = "KEG_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output (info-level logs).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search nodes across kegs.
    Search(SearchArgs),
    /// Rebuild dex artifacts.
    Index(IndexArgs),
    /// List the nodes of a keg.
    Nodes(NodesArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let output = Output::new();

    // --verbose enables INFO level, otherwise use RUST_LOG or default to WARN
    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = Context::load(cli.config.as_deref()).and_then(|mut ctx| match cli.command {
        Commands::Search(args) => args.execute(&mut ctx, &output),
        Commands::Index(args) => args.execute(&mut ctx, &output),
        Commands::Nodes(args) => args.execute(&mut ctx, &output),
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output.error(&format!("Error: {err}"));
            ExitCode::FAILURE
        }
    }
}
