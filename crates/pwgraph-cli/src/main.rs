//! `pwgraph` — a small CLI exercising the engine end-to-end: build a graph
//! from a config file, run it for a fixed number of cycles, and report
//! what happened.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pwgraph")]
#[command(author, version, about = "pw-graph real-time node graph engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a graph from a config file and run it for N cycles
    Run(commands::run::RunArgs),

    /// Parse and display a config file's sections
    Inspect(commands::inspect::InspectArgs),

    /// Show the config file search path
    Paths(commands::paths::PathsArgs),
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Inspect(args) => commands::inspect::run(args),
        Commands::Paths(args) => commands::paths::run(args),
    }
}
