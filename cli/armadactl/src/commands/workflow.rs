//! Workflow commands.

use anyhow::Result;
use clap::{Args, Subcommand};

use armada_api::rpc::WorkflowOpResponse;

use crate::output::{print_single, print_success};

use super::CommandContext;

/// Workflow commands.
#[derive(Debug, Args)]
pub struct WorkflowCommand {
    #[command(subcommand)]
    command: WorkflowSubcommand,
}

#[derive(Debug, Subcommand)]
enum WorkflowSubcommand {
    /// Pause a rolling workflow.
    Pause(WorkflowIdArg),

    /// Resume a paused workflow.
    Resume(WorkflowIdArg),

    /// Abort a workflow.
    Abort(WorkflowIdArg),
}

#[derive(Debug, Args)]
struct WorkflowIdArg {
    /// Workflow ID.
    workflow: String,
}

impl WorkflowCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let (verb, args) = match &self.command {
            WorkflowSubcommand::Pause(args) => ("pause", args),
            WorkflowSubcommand::Resume(args) => ("resume", args),
            WorkflowSubcommand::Abort(args) => ("abort", args),
        };

        let client = ctx.jobmgr()?;
        let response: WorkflowOpResponse = client
            .post(
                &format!("/v1/workflows/{}/{verb}", args.workflow),
                &serde_json::json!({}),
            )
            .await?;

        print_success(&format!(
            "workflow {} now {}",
            args.workflow,
            response.workflow_status.state.as_str()
        ));
        print_single(&response.workflow_status);
        Ok(())
    }
}
