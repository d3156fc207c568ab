//! CLI commands.

mod host;
mod job;
mod workflow;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::client::ApiClient;
use crate::output::OutputFormat;

/// armadactl - operate armada jobs, workflows, and hosts.
#[derive(Debug, Parser)]
#[command(name = "armadactl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Job manager base URL.
    #[arg(
        long,
        global = true,
        env = "ARMADA_JOBMGR_URL",
        default_value = "http://127.0.0.1:8570"
    )]
    jobmgr_url: String,

    /// Host manager base URL.
    #[arg(
        long,
        global = true,
        env = "ARMADA_HOSTMGR_URL",
        default_value = "http://127.0.0.1:8580"
    )]
    hostmgr_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage jobs.
    Job(job::JobCommand),

    /// Manage rolling workflows.
    Workflow(workflow::WorkflowCommand),

    /// Manage hosts (queries and maintenance).
    Host(host::HostCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format = match self.format.as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        };

        let ctx = CommandContext {
            jobmgr_url: self.jobmgr_url,
            hostmgr_url: self.hostmgr_url,
            format,
        };

        match self.command {
            Commands::Job(cmd) => cmd.run(ctx).await,
            Commands::Workflow(cmd) => cmd.run(ctx).await,
            Commands::Host(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("armadactl {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub jobmgr_url: String,
    pub hostmgr_url: String,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Client against the job manager.
    pub fn jobmgr(&self) -> Result<ApiClient> {
        ApiClient::new(&self.jobmgr_url)
    }

    /// Client against the host manager.
    pub fn hostmgr(&self) -> Result<ApiClient> {
        ApiClient::new(&self.hostmgr_url)
    }
}
