use clap::Args;
use poflow_core::config::LoadOptions;
use poflow_core::{CompanyId, OrderId, StepInstance, StepTracker};
use serde::Serialize;

use crate::commands::route::OrderFacts;
use crate::commands::{
    application_failure, execute, new_correlation_id, open_store, CommandResult, Failure,
};

#[derive(Debug, Clone, Args)]
pub struct InstantiateArgs {
    #[arg(long, help = "Purchase order id")]
    pub order: String,
    #[command(flatten)]
    pub facts: OrderFacts,
    #[arg(long, help = "Instantiate this named template regardless of the order amount")]
    pub template: Option<String>,
}

#[derive(Debug, Serialize)]
struct InstantiateOutput {
    order_id: OrderId,
    steps: Vec<StepInstance>,
}

pub fn run(options: &LoadOptions, args: &InstantiateArgs) -> CommandResult {
    execute("instantiate", options, |config| async move {
        let store = open_store(&config).await?;
        let tracker = StepTracker::new(store, config.workflow.router_settings());
        let order_id = OrderId(args.order.clone());
        let correlation_id = new_correlation_id();

        let steps = match &args.template {
            Some(template_name) => {
                let company_id = CompanyId(args.facts.company.clone());
                tracker
                    .create_instances_from_template(&order_id, &company_id, template_name)
                    .await
            }
            None => {
                let context = args.facts.route_context(&args.order);
                tracker.create_instances(&order_id, &context).await
            }
        }
        .map_err(|error| application_failure(error, &correlation_id))?;

        let message = if steps.is_empty() {
            format!("order `{order_id}` routed to direct approval; no steps created")
        } else {
            format!("created {} pending approval steps for order `{order_id}`", steps.len())
        };
        Ok::<_, Failure>((message, Some(InstantiateOutput { order_id, steps })))
    })
}
