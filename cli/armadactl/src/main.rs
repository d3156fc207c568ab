//! armadactl - CLI for the armada orchestrator.
//!
//! Thin front-end over the job manager and host manager HTTP surfaces;
//! exit code 0 on success, non-zero on any RPC error.

use anyhow::Result;
use clap::Parser;

mod client;
mod commands;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
