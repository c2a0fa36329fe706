use clap::Args;
use poflow_core::config::LoadOptions;
use poflow_core::{
    ApplicationError, ApprovalOutcome, ApprovalProgress, OrderId, StepInstance, StepTracker,
};
use serde::Serialize;

use crate::commands::{
    application_failure, execute, new_correlation_id, open_store, CommandResult, Failure,
};

#[derive(Debug, Clone, Args)]
pub struct ProgressArgs {
    #[arg(long, help = "Purchase order id")]
    pub order: String,
}

#[derive(Debug, Serialize)]
struct ProgressOutput {
    order_id: OrderId,
    outcome: ApprovalOutcome,
    is_complete: bool,
    progress: ApprovalProgress,
    steps: Vec<StepInstance>,
}

pub fn run(options: &LoadOptions, args: &ProgressArgs) -> CommandResult {
    execute("progress", options, |config| async move {
        let store = open_store(&config).await?;
        let tracker = StepTracker::new(store, config.workflow.router_settings());
        let order_id = OrderId(args.order.clone());
        let correlation_id = new_correlation_id();
        let fail = |error: ApplicationError| application_failure(error, &correlation_id);

        let steps = tracker.list_steps(&order_id).await.map_err(fail)?;
        let progress = tracker.get_progress(&order_id).await.map_err(fail)?;
        let outcome = tracker.outcome(&order_id).await.map_err(fail)?;
        let is_complete = tracker.is_complete(&order_id).await.map_err(fail)?;

        let message = format!(
            "order `{order_id}`: {}/{} steps complete ({}%), outcome {}",
            progress.completed_steps,
            progress.total_steps,
            progress.progress_percentage,
            outcome_label(outcome)
        );
        let output = ProgressOutput { order_id, outcome, is_complete, progress, steps };
        Ok::<_, Failure>((message, Some(output)))
    })
}

fn outcome_label(outcome: ApprovalOutcome) -> &'static str {
    match outcome {
        ApprovalOutcome::NotRequired => "not_required",
        ApprovalOutcome::InProgress => "in_progress",
        ApprovalOutcome::Approved => "approved",
        ApprovalOutcome::Rejected => "rejected",
    }
}
