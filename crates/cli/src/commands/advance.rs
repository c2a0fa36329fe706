use clap::Args;
use poflow_core::audit::{AuditContext, TracingAuditSink};
use poflow_core::config::LoadOptions;
use poflow_core::{Actor, Role, StepDecision, StepInstanceId, StepNote, StepTracker};

use crate::commands::{
    application_failure, execute, new_correlation_id, open_store, CommandResult, Failure,
};

#[derive(Debug, Clone, Args)]
pub struct AdvanceArgs {
    #[arg(long, help = "Step instance id")]
    pub instance: String,
    #[arg(long, help = "approved, rejected, or skipped")]
    pub decision: StepDecision,
    #[arg(long, help = "Deciding user id")]
    pub user: String,
    #[arg(long, help = "Deciding user's role")]
    pub role: Role,
    #[arg(long)]
    pub comments: Option<String>,
    #[arg(long, help = "Reason recorded with a rejection")]
    pub reason: Option<String>,
}

pub fn run(options: &LoadOptions, args: &AdvanceArgs) -> CommandResult {
    execute("advance", options, |config| async move {
        let store = open_store(&config).await?;
        let tracker = StepTracker::new(store, config.workflow.router_settings());
        let instance_id = StepInstanceId(args.instance.clone());
        let actor = Actor::new(args.user.clone(), args.role);
        let note =
            StepNote { comments: args.comments.clone(), rejection_reason: args.reason.clone() };
        let correlation_id = new_correlation_id();
        let audit = AuditContext::new(None, correlation_id.clone(), args.user.clone());

        let step = tracker
            .advance_step_with_audit(
                &instance_id,
                args.decision,
                &actor,
                note,
                &TracingAuditSink,
                &audit,
            )
            .await
            .map_err(|error| application_failure(error, &correlation_id))?;

        let message = format!(
            "step {} of order `{}` is now {}",
            step.step_order, step.order_id, step.status
        );
        Ok::<_, Failure>((message, Some(step)))
    })
}
