//! Host commands (queries and maintenance).

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use armada_api::rpc::{
    GetHostsByQueryRequest, GetHostsByQueryResponse, HostMaintenanceRequest, QueryHostsResponse,
};
use armada_api::{HostInfo, HostQuery, ResourceSpec};

use crate::output::{print_output, print_single, print_success, OutputFormat};

use super::CommandContext;

/// Host commands.
#[derive(Debug, Args)]
pub struct HostCommand {
    #[command(subcommand)]
    command: HostSubcommand,
}

#[derive(Debug, Subcommand)]
enum HostSubcommand {
    /// Query hosts by available resources.
    Query(QueryHostsArgs),

    /// Host maintenance operations.
    Maintenance(MaintenanceCommand),
}

#[derive(Debug, Args)]
struct QueryHostsArgs {
    /// Minimum available CPU cores.
    #[arg(long, default_value = "0")]
    cpus: f64,

    /// Minimum available memory (MB).
    #[arg(long, default_value = "0")]
    mem_mb: f64,

    /// Minimum available GPU cores.
    #[arg(long, default_value = "0")]
    gpus: f64,

    /// Restrict to specific hostnames (comma-separated).
    #[arg(long, value_delimiter = ',')]
    hosts: Vec<String>,
}

#[derive(Debug, Args)]
struct MaintenanceCommand {
    #[command(subcommand)]
    command: MaintenanceSubcommand,
}

#[derive(Debug, Subcommand)]
enum MaintenanceSubcommand {
    /// Start draining hosts for maintenance.
    Start(MaintenanceHostsArgs),

    /// Complete maintenance; hosts match again once offers arrive.
    Complete(MaintenanceHostsArgs),

    /// Show hosts and which are draining.
    Query,
}

#[derive(Debug, Args)]
struct MaintenanceHostsArgs {
    /// Hostnames (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    hosts: Vec<String>,
}

impl HostCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            HostSubcommand::Query(args) => query_hosts(ctx, args).await,
            HostSubcommand::Maintenance(cmd) => match cmd.command {
                MaintenanceSubcommand::Start(args) => maintenance_start(ctx, args).await,
                MaintenanceSubcommand::Complete(args) => maintenance_complete(ctx, args).await,
                MaintenanceSubcommand::Query => maintenance_query(ctx).await,
            },
        }
    }
}

/// Host row for table output.
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct HostRow {
    #[tabled(rename = "Hostname")]
    hostname: String,

    #[tabled(rename = "Status")]
    status: String,

    #[tabled(rename = "CPU")]
    cpu: f64,

    #[tabled(rename = "Mem (MB)")]
    mem_mb: f64,

    #[tabled(rename = "GPU")]
    gpu: f64,

    #[tabled(rename = "Held tasks")]
    held: usize,
}

fn to_rows(hosts: Vec<HostInfo>) -> Vec<HostRow> {
    hosts
        .into_iter()
        .map(|host| HostRow {
            hostname: host.hostname,
            status: host.status.as_str().to_string(),
            cpu: host.resources.cpu,
            mem_mb: host.resources.mem_mb,
            gpu: host.resources.gpu,
            held: host.held_tasks.len(),
        })
        .collect()
}

async fn query_hosts(ctx: CommandContext, args: QueryHostsArgs) -> Result<()> {
    let min = ResourceSpec {
        cpu: args.cpus,
        mem_mb: args.mem_mb,
        gpu: args.gpus,
        ..ResourceSpec::ZERO
    };
    let client = ctx.hostmgr()?;
    let response: GetHostsByQueryResponse = client
        .post(
            "/v1/hosts/by-resource",
            &GetHostsByQueryRequest {
                query: HostQuery {
                    min_resources: if min.is_zero() { None } else { Some(min) },
                    hostnames: args.hosts,
                },
            },
        )
        .await?;

    match ctx.format {
        OutputFormat::Table => print_output(&to_rows(response.hosts), ctx.format),
        OutputFormat::Json => print_single(&response),
    }
    Ok(())
}

async fn maintenance_start(ctx: CommandContext, args: MaintenanceHostsArgs) -> Result<()> {
    let client = ctx.hostmgr()?;
    client
        .post_empty(
            "/v1/hosts/maintenance/start",
            &HostMaintenanceRequest {
                hostnames: args.hosts.clone(),
            },
        )
        .await?;
    print_success(&format!("draining {} host(s)", args.hosts.len()));
    Ok(())
}

async fn maintenance_complete(ctx: CommandContext, args: MaintenanceHostsArgs) -> Result<()> {
    let client = ctx.hostmgr()?;
    client
        .post_empty(
            "/v1/hosts/maintenance/complete",
            &HostMaintenanceRequest {
                hostnames: args.hosts.clone(),
            },
        )
        .await?;
    print_success(&format!("maintenance complete for {} host(s)", args.hosts.len()));
    Ok(())
}

async fn maintenance_query(ctx: CommandContext) -> Result<()> {
    let client = ctx.hostmgr()?;
    let response: QueryHostsResponse = client.get("/v1/hosts").await?;

    match ctx.format {
        OutputFormat::Table => {
            print_output(&to_rows(response.hosts), ctx.format);
            if !response.draining.is_empty() {
                println!("Draining: {}", response.draining.join(", "));
            }
        }
        OutputFormat::Json => print_single(&response),
    }
    Ok(())
}
