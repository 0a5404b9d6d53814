//! Mondrian CLI.
//!
//! Subcommands:
//!   serve     - run the HTTP API, job engine, and reaper
//!   supervise - manage child services and reap stale jobs
//!   ingest    - load reference profiles for an advisor
//!   advisors  - seed or list the advisor catalog

mod commands;

use clap::{Parser, Subcommand};
use mondrian_logging::{init_logging, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "mondrian", about = "Image analysis pipeline with advisor personas")]
struct Cli {
    /// Verbose console logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API, worker pool, and reaper
    Serve(commands::serve::ServeArgs),
    /// Start managed child services and the standalone reaper
    Supervise(commands::supervise::SuperviseArgs),
    /// Ingest a directory of reference profile documents
    Ingest(commands::ingest::IngestArgs),
    /// Manage the advisor catalog
    Advisors(commands::advisors::AdvisorsArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app_name = match &cli.command {
        Command::Serve(_) => "mondrian-serve",
        Command::Supervise(_) => "mondrian-supervise",
        Command::Ingest(_) => "mondrian-ingest",
        Command::Advisors(_) => "mondrian-advisors",
    };
    init_logging(LogConfig {
        app_name,
        verbose: cli.verbose,
    })?;

    match cli.command {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Supervise(args) => commands::supervise::run(args).await,
        Command::Ingest(args) => commands::ingest::run(args).await,
        Command::Advisors(args) => commands::advisors::run(args).await,
    }
}
