use clap::Args;
use poflow_core::audit::{AuditContext, TracingAuditSink};
use poflow_core::config::LoadOptions;
use poflow_core::{ApprovalRouter, CompanyId, OrderId, Priority, Role, RouteContext, UserId};
use rust_decimal::Decimal;

use crate::commands::{execute, new_correlation_id, open_store, CommandResult, Failure};

/// Order facts shared by `route` and `instantiate`.
#[derive(Debug, Clone, Args)]
pub struct OrderFacts {
    #[arg(long, help = "Company whose workflow configuration applies")]
    pub company: String,
    #[arg(long, allow_negative_numbers = true, help = "Order total")]
    pub amount: Decimal,
    #[arg(long, help = "Role of the requesting user (field_worker, project_manager, ...)")]
    pub role: Role,
    #[arg(long, help = "Requesting user id")]
    pub user: String,
    #[arg(long, help = "Order priority (low, medium, high)")]
    pub priority: Option<Priority>,
}

impl OrderFacts {
    pub fn route_context(&self, order_id: &str) -> RouteContext {
        RouteContext {
            order_id: OrderId(order_id.to_string()),
            order_amount: self.amount,
            company_id: CompanyId(self.company.clone()),
            acting_user_id: UserId(self.user.clone()),
            acting_role: self.role,
            priority: self.priority,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct RouteArgs {
    #[command(flatten)]
    pub facts: OrderFacts,
    #[arg(long, default_value = "preview", help = "Order id recorded in logs and audit events")]
    pub order: String,
}

pub fn run(options: &LoadOptions, args: &RouteArgs) -> CommandResult {
    execute("route", options, |config| async move {
        let store = open_store(&config).await?;
        let router = ApprovalRouter::new(store, config.workflow.router_settings());
        let context = args.facts.route_context(&args.order);
        let audit = AuditContext::new(
            Some(context.order_id.clone()),
            new_correlation_id(),
            args.facts.user.clone(),
        );

        let decision = router.determine_route_with_audit(&context, &TracingAuditSink, &audit).await;
        Ok::<_, Failure>((decision.reasoning.clone(), Some(decision)))
    })
}
