// SPDX-License-Identifier: MIT

//! raftq - run and inspect raftq nodes.
//!
//! Out of this crate's core scope (spec §6): a thin wrapper over the
//! daemon's `lifecycle` and wire protocol, not a client for every RPC the
//! protocol exposes.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{enqueue, run, status};

#[derive(Parser, Debug)]
#[command(name = "raftq", version, about = "Fault-tolerant distributed job queue")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a node
    Run(run::RunArgs),
    /// Submit jobs read from a file to a running leader
    Enqueue(enqueue::EnqueueArgs),
    /// Print a node's status
    Status(status::StatusArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run::run(args).await,
        Commands::Enqueue(args) => enqueue::enqueue(args).await,
        Commands::Status(args) => status::status(args).await,
    };
    if let Err(e) = &result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
