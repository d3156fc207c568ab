//! Job commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use armada_api::rpc::{
    CreateJobRequest, CreateJobResponse, GetJobResponse, JobVersionResponse, ListJobsResponse,
    QueryJobsRequest, QueryJobsResponse, RestartJobRequest, RestartJobResponse, UpdateJobRequest,
    UpdateJobResponse,
};
use armada_api::{JobSpec, JobState, JobType, ResourceSpec, WorkflowSpec};

use crate::output::{print_output, print_single, print_success, OutputFormat};

use super::CommandContext;

/// Job commands.
#[derive(Debug, Args)]
pub struct JobCommand {
    #[command(subcommand)]
    command: JobSubcommand,
}

#[derive(Debug, Subcommand)]
enum JobSubcommand {
    /// Submit a new job.
    Create(CreateJobArgs),

    /// Get job details and status.
    Get(JobIdArg),

    /// List all jobs.
    List,

    /// Query jobs by state, owner, or name.
    Query(QueryJobsArgs),

    /// Drive a stopped job back toward its running goal state.
    Start(JobIdArg),

    /// Stop a job (goal state KILLED).
    Stop(JobIdArg),

    /// Restart job instances through a rolling workflow.
    Restart(RestartJobArgs),

    /// Update a job's spec through a rolling workflow.
    Update(UpdateJobArgs),

    /// Delete a job (goal state DELETED).
    Delete(JobIdArg),
}

#[derive(Debug, Args)]
struct JobIdArg {
    /// Job ID.
    job: String,
}

#[derive(Debug, Args)]
struct CreateJobArgs {
    /// Path to a JSON job spec. Flags below override nothing when set.
    #[arg(long, conflicts_with_all = ["name", "instances"])]
    spec_file: Option<String>,

    /// Job name.
    #[arg(long)]
    name: Option<String>,

    /// Instance count.
    #[arg(long, default_value = "1")]
    instances: u32,

    /// Job type: batch or service.
    #[arg(long, default_value = "batch")]
    job_type: String,

    /// CPU cores per instance.
    #[arg(long, default_value = "1.0")]
    cpus: f64,

    /// Memory (MB) per instance.
    #[arg(long, default_value = "256")]
    mem_mb: f64,

    /// Disk (MB) per instance.
    #[arg(long, default_value = "1024")]
    disk_mb: f64,

    /// GPU cores per instance.
    #[arg(long, default_value = "0")]
    gpus: f64,

    /// Resource pool.
    #[arg(long, default_value = "default")]
    pool: String,
}

#[derive(Debug, Args)]
struct QueryJobsArgs {
    /// Only jobs in these states (repeatable).
    #[arg(long)]
    state: Vec<String>,

    /// Only jobs owned by this owner.
    #[arg(long)]
    owner: Option<String>,

    /// Only jobs whose name contains this fragment.
    #[arg(long)]
    name: Option<String>,
}

#[derive(Debug, Args)]
struct RestartJobArgs {
    /// Job ID.
    job: String,

    /// Instances restarted concurrently.
    #[arg(long, default_value = "1")]
    batch_size: u32,
}

#[derive(Debug, Args)]
struct UpdateJobArgs {
    /// Job ID.
    job: String,

    /// Path to the new JSON job spec.
    #[arg(long)]
    spec_file: String,

    /// Instances updated concurrently.
    #[arg(long, default_value = "1")]
    batch_size: u32,

    /// Failed instances tolerated before giving up.
    #[arg(long, default_value = "0")]
    max_failures: u32,

    /// Roll back to the previous config version on failure.
    #[arg(long)]
    rollback_on_failure: bool,

    /// Experimental: also start instances that are not running.
    #[arg(long)]
    start_tasks: bool,
}

impl JobCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            JobSubcommand::Create(args) => create_job(ctx, args).await,
            JobSubcommand::Get(args) => get_job(ctx, args).await,
            JobSubcommand::List => list_jobs(ctx).await,
            JobSubcommand::Query(args) => query_jobs(ctx, args).await,
            JobSubcommand::Start(args) => start_job(ctx, args).await,
            JobSubcommand::Stop(args) => stop_job(ctx, args).await,
            JobSubcommand::Restart(args) => restart_job(ctx, args).await,
            JobSubcommand::Update(args) => update_job(ctx, args).await,
            JobSubcommand::Delete(args) => delete_job(ctx, args).await,
        }
    }
}

/// Job row for table output.
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Type")]
    job_type: String,

    #[tabled(rename = "State")]
    state: String,

    #[tabled(rename = "Instances")]
    instances: u32,
}

fn load_spec(args: &CreateJobArgs) -> Result<JobSpec> {
    if let Some(path) = &args.spec_file {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        return serde_json::from_str(&raw).with_context(|| format!("parsing {path}"));
    }

    let name = args
        .name
        .clone()
        .context("either --spec-file or --name is required")?;
    let job_type = match args.job_type.as_str() {
        "service" => JobType::Service,
        _ => JobType::Batch,
    };
    let mut spec = JobSpec {
        name,
        job_type,
        instance_count: args.instances,
        resource_pool: args.pool.clone(),
        ..JobSpec::default()
    };
    spec.default_config.resource = ResourceSpec {
        cpu: args.cpus,
        mem_mb: args.mem_mb,
        disk_mb: args.disk_mb,
        gpu: args.gpus,
        ports: 0,
    };
    Ok(spec)
}

async fn create_job(ctx: CommandContext, args: CreateJobArgs) -> Result<()> {
    let spec = load_spec(&args)?;
    let client = ctx.jobmgr()?;
    let response: CreateJobResponse = client
        .post("/v1/jobs", &CreateJobRequest { spec })
        .await?;
    print_success(&format!("job {} created", response.job_id));
    Ok(())
}

async fn get_job(ctx: CommandContext, args: JobIdArg) -> Result<()> {
    let client = ctx.jobmgr()?;
    let response: GetJobResponse = client.get(&format!("/v1/jobs/{}", args.job)).await?;
    print_single(&response);
    Ok(())
}

fn to_rows(jobs: Vec<armada_api::JobSummary>) -> Vec<JobRow> {
    jobs.into_iter()
        .map(|job| JobRow {
            id: job.id.to_string(),
            name: job.name,
            job_type: format!("{:?}", job.job_type),
            state: job.state.as_str().to_string(),
            instances: job.instance_count,
        })
        .collect()
}

async fn list_jobs(ctx: CommandContext) -> Result<()> {
    let client = ctx.jobmgr()?;
    let response: ListJobsResponse = client.get("/v1/jobs").await?;
    match ctx.format {
        OutputFormat::Table => print_output(&to_rows(response.jobs), ctx.format),
        OutputFormat::Json => print_single(&response),
    }
    Ok(())
}

async fn query_jobs(ctx: CommandContext, args: QueryJobsArgs) -> Result<()> {
    let states: Vec<JobState> = args
        .state
        .iter()
        .filter_map(|s| JobState::parse(&s.to_uppercase()))
        .collect();
    let client = ctx.jobmgr()?;
    let response: QueryJobsResponse = client
        .post(
            "/v1/jobs/query",
            &QueryJobsRequest {
                states,
                owner: args.owner,
                name_contains: args.name,
            },
        )
        .await?;
    match ctx.format {
        OutputFormat::Table => print_output(&to_rows(response.jobs), ctx.format),
        OutputFormat::Json => print_single(&response),
    }
    Ok(())
}

async fn start_job(ctx: CommandContext, args: JobIdArg) -> Result<()> {
    let client = ctx.jobmgr()?;
    let response: JobVersionResponse = client
        .post(&format!("/v1/jobs/{}/start", args.job), &serde_json::json!({}))
        .await?;
    print_success(&format!("job {} starting (version {})", args.job, response.version));
    Ok(())
}

async fn stop_job(ctx: CommandContext, args: JobIdArg) -> Result<()> {
    let client = ctx.jobmgr()?;
    let response: JobVersionResponse = client
        .post(&format!("/v1/jobs/{}/stop", args.job), &serde_json::json!({}))
        .await?;
    print_success(&format!("job {} stopping (version {})", args.job, response.version));
    Ok(())
}

async fn restart_job(ctx: CommandContext, args: RestartJobArgs) -> Result<()> {
    let client = ctx.jobmgr()?;
    let response: RestartJobResponse = client
        .post(
            &format!("/v1/jobs/{}/restart", args.job),
            &RestartJobRequest {
                instance_ranges: Vec::new(),
                workflow: WorkflowSpec {
                    batch_size: args.batch_size,
                    ..WorkflowSpec::default()
                },
            },
        )
        .await?;
    print_success(&format!(
        "restart workflow {} started for job {}",
        response.workflow_id, args.job
    ));
    Ok(())
}

async fn update_job(ctx: CommandContext, args: UpdateJobArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.spec_file)
        .with_context(|| format!("reading {}", args.spec_file))?;
    let spec: JobSpec =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", args.spec_file))?;

    let client = ctx.jobmgr()?;
    let response: UpdateJobResponse = client
        .put(
            &format!("/v1/jobs/{}", args.job),
            &UpdateJobRequest {
                spec,
                workflow: WorkflowSpec {
                    batch_size: args.batch_size,
                    max_tolerable_instance_failures: args.max_failures,
                    rollback_on_failure: args.rollback_on_failure,
                    start_tasks: args.start_tasks,
                    ..WorkflowSpec::default()
                },
            },
        )
        .await?;
    print_success(&format!(
        "update workflow {} started (config version {})",
        response.workflow_id, response.config_version
    ));
    Ok(())
}

async fn delete_job(ctx: CommandContext, args: JobIdArg) -> Result<()> {
    let client = ctx.jobmgr()?;
    client.delete(&format!("/v1/jobs/{}", args.job)).await?;
    print_success(&format!("job {} deletion requested", args.job));
    Ok(())
}
