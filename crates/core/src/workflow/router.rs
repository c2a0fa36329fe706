use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::order::{CompanyId, OrderId, UserId};
use crate::domain::policy::{ApprovalMode, WorkflowPolicy};
use crate::domain::role::Role;
use crate::domain::template::{StepTemplate, StepTemplateId};
use crate::errors::DomainError;
use crate::workflow::store::{StoreError, WorkflowStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl FromStr for Priority {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(DomainError::InvariantViolation(format!(
                "unsupported priority `{other}` (expected low|medium|high)"
            ))),
        }
    }
}

/// Order facts the router decides on. The acting identity is trusted as authenticated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteContext {
    pub order_id: OrderId,
    pub order_amount: Decimal,
    pub company_id: CompanyId,
    pub acting_user_id: UserId,
    pub acting_role: Role,
    pub priority: Option<Priority>,
}

/// Which branch of the routing algorithm produced a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteBasis {
    NoPolicy,
    DirectPolicy,
    Staged,
    NoMatchingTemplate,
    AllStepsRemoved,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub approval_mode: ApprovalMode,
    pub can_direct_approve: bool,
    pub direct_approval_users: Vec<UserId>,
    pub staged_approval_steps: Vec<StepTemplate>,
    pub template_name: Option<String>,
    /// Steps removed because the acting role's authority already covers the amount.
    pub skipped_step_ids: Vec<StepTemplateId>,
    pub basis: RouteBasis,
    pub reasoning: String,
}

impl RouteDecision {
    /// Admin-only direct approval, used whenever configuration cannot decide.
    fn admin_only(context: &RouteContext, basis: RouteBasis, reasoning: String) -> Self {
        Self {
            approval_mode: ApprovalMode::Direct,
            can_direct_approve: context.acting_role == Role::Admin,
            direct_approval_users: Vec::new(),
            staged_approval_steps: Vec::new(),
            template_name: None,
            skipped_step_ids: Vec::new(),
            basis,
            reasoning,
        }
    }

    pub fn is_staged(&self) -> bool {
        self.approval_mode == ApprovalMode::Staged
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouterSettings {
    pub directory_preview_limit: usize,
    pub high_priority_step_threshold: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self { directory_preview_limit: 10, high_priority_step_threshold: 2 }
    }
}

#[derive(Debug)]
enum RouteFailure {
    InvalidAmount(Decimal),
    Store(StoreError),
}

impl fmt::Display for RouteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAmount(amount) => write!(f, "order amount {amount} must be positive"),
            Self::Store(error) => write!(f, "{error}"),
        }
    }
}

impl From<StoreError> for RouteFailure {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Stateless routing service over an injected store.
pub struct ApprovalRouter<S> {
    store: Arc<S>,
    settings: RouterSettings,
}

impl<S> Clone for ApprovalRouter<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), settings: self.settings }
    }
}

impl<S> ApprovalRouter<S>
where
    S: WorkflowStore,
{
    pub fn new(store: Arc<S>, settings: RouterSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> RouterSettings {
        self.settings
    }

    /// Decides the approval path for an order.
    ///
    /// Never fails: any error while consulting the store degrades to admin-only
    /// direct approval and is logged.
    pub async fn determine_route(&self, context: &RouteContext) -> RouteDecision {
        match self.try_route(context).await {
            Ok(decision) => {
                info!(
                    event_name = "workflow.route.decided",
                    order_id = %context.order_id,
                    company_id = %context.company_id,
                    approval_mode = %decision.approval_mode,
                    step_count = decision.staged_approval_steps.len(),
                    can_direct_approve = decision.can_direct_approve,
                    "approval route decided"
                );
                decision
            }
            Err(failure) => {
                error!(
                    event_name = "workflow.route.degraded",
                    order_id = %context.order_id,
                    company_id = %context.company_id,
                    error = %failure,
                    "approval routing failed; falling back to admin-only direct approval"
                );
                RouteDecision::admin_only(
                    context,
                    RouteBasis::Degraded,
                    format!(
                        "Routing could not be completed ({failure}); defaulting to admin-only \
                         direct approval."
                    ),
                )
            }
        }
    }

    pub async fn determine_route_with_audit<A>(
        &self,
        context: &RouteContext,
        sink: &A,
        audit: &AuditContext,
    ) -> RouteDecision
    where
        A: AuditSink + ?Sized,
    {
        let decision = self.determine_route(context).await;
        let (event_type, outcome) = if decision.basis == RouteBasis::Degraded {
            ("routing.degraded", AuditOutcome::Failed)
        } else {
            ("routing.decided", AuditOutcome::Success)
        };

        sink.emit(
            audit
                .event(event_type, AuditCategory::Routing, outcome)
                .with_metadata("approval_mode", decision.approval_mode.as_str())
                .with_metadata("basis", format!("{:?}", decision.basis))
                .with_metadata("order_amount", context.order_amount.to_string())
                .with_metadata("step_count", decision.staged_approval_steps.len().to_string())
                .with_metadata("reasoning", decision.reasoning.clone()),
        );
        decision
    }

    async fn try_route(&self, context: &RouteContext) -> Result<RouteDecision, RouteFailure> {
        if context.order_amount <= Decimal::ZERO {
            return Err(RouteFailure::InvalidAmount(context.order_amount));
        }

        let Some(policy) = self.store.find_active_policy(&context.company_id).await? else {
            debug!(
                event_name = "workflow.route.no_policy",
                company_id = %context.company_id,
                "no active workflow policy for company"
            );
            return Ok(RouteDecision::admin_only(
                context,
                RouteBasis::NoPolicy,
                "No approval workflow policy is configured; defaulting to admin-only direct \
                 approval."
                    .to_owned(),
            ));
        };

        match policy.approval_mode {
            ApprovalMode::Direct => Ok(self.route_direct(context, &policy).await),
            ApprovalMode::Staged => self.route_staged(context, &policy).await,
        }
    }

    async fn route_direct(&self, context: &RouteContext, policy: &WorkflowPolicy) -> RouteDecision {
        let role = context.acting_role;
        let can_direct_approve = policy.allows_direct_approval(role);

        let direct_approval_users =
            match self.store.users_with_role(role, self.settings.directory_preview_limit).await {
                Ok(users) => users.into_iter().map(|user| user.id).collect(),
                Err(error) => {
                    warn!(
                        event_name = "workflow.route.directory_unavailable",
                        role = %role,
                        error = %error,
                        "could not list users sharing the acting role"
                    );
                    Vec::new()
                }
            };

        let reasoning = if can_direct_approve {
            format!("Role `{role}` is authorized to approve this order directly.")
        } else {
            format!("Role `{role}` is not authorized for direct approval under the company policy.")
        };

        RouteDecision {
            approval_mode: ApprovalMode::Direct,
            can_direct_approve,
            direct_approval_users,
            staged_approval_steps: Vec::new(),
            template_name: None,
            skipped_step_ids: Vec::new(),
            basis: RouteBasis::DirectPolicy,
            reasoning,
        }
    }

    async fn route_staged(
        &self,
        context: &RouteContext,
        policy: &WorkflowPolicy,
    ) -> Result<RouteDecision, RouteFailure> {
        let amount = context.order_amount;
        let candidates = self.store.matching_steps(&context.company_id, amount).await?;

        let Some(template_name) = candidates.first().map(|step| step.template_name.clone()) else {
            return Ok(RouteDecision::admin_only(
                context,
                RouteBasis::NoMatchingTemplate,
                format!(
                    "No staged approval template covers an order of {amount}; falling back to \
                     admin-only direct approval."
                ),
            ));
        };

        let matched = candidates.len();
        let mut steps = candidates;
        let abbreviated = context.priority == Some(Priority::High)
            && matched > self.settings.high_priority_step_threshold;
        if abbreviated {
            steps.retain(|step| !step.is_optional);
        }

        let mut skipped_step_ids = Vec::new();
        if policy.skip_lower_stages {
            let skippable = self.skippable_steps(context, &steps).await?;
            if !skippable.is_empty() {
                steps.retain(|step| !skippable.contains(&step.id));
                skipped_step_ids = skippable;
            }
        }

        if steps.is_empty() {
            return Ok(RouteDecision::admin_only(
                context,
                RouteBasis::AllStepsRemoved,
                format!(
                    "All {matched} matching approval steps for an order of {amount} were removed \
                     (abbreviated: {abbreviated}, skipped: {}); falling back to admin-only \
                     direct approval.",
                    skipped_step_ids.len()
                ),
            ));
        }

        let mut reasoning =
            format!("Applying a {}-step staged approval for an order of {amount}.", steps.len());
        if abbreviated {
            reasoning.push_str(" High priority: optional steps were dropped.");
        }
        if !skipped_step_ids.is_empty() {
            reasoning.push_str(&format!(
                " {} lower step(s) skipped under the authority of role `{}`.",
                skipped_step_ids.len(),
                context.acting_role
            ));
        }

        Ok(RouteDecision {
            approval_mode: ApprovalMode::Staged,
            can_direct_approve: false,
            direct_approval_users: Vec::new(),
            staged_approval_steps: steps,
            template_name: Some(template_name),
            skipped_step_ids,
            basis: RouteBasis::Staged,
            reasoning,
        })
    }

    /// Steps the acting role may vouch for: only when its authority covers the amount,
    /// and only steps flagged `can_skip` that require a different role.
    async fn skippable_steps(
        &self,
        context: &RouteContext,
        steps: &[StepTemplate],
    ) -> Result<Vec<StepTemplateId>, StoreError> {
        let Some(authority) = self.store.find_active_authority(context.acting_role).await? else {
            return Ok(Vec::new());
        };

        if !authority.covers(context.order_amount) {
            return Ok(Vec::new());
        }

        Ok(steps
            .iter()
            .filter(|step| step.can_skip && step.required_role != context.acting_role)
            .map(|step| step.id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::{ApprovalRouter, Priority, RouteBasis, RouteContext, RouterSettings};
    use crate::audit::{AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::domain::authority::AuthorityDraft;
    use crate::domain::order::{CompanyId, OrderId, UserId};
    use crate::domain::policy::{ApprovalMode, PolicyDraft};
    use crate::domain::role::Role;
    use crate::domain::template::StepTemplateDraft;
    use crate::workflow::memory::InMemoryWorkflowStore;
    use crate::workflow::store::{AuthorityRegistry, PolicyStore, TemplateCatalog};

    const COMPANY: &str = "company-1";

    fn company() -> CompanyId {
        CompanyId(COMPANY.to_owned())
    }

    fn context(amount: i64, role: Role) -> RouteContext {
        RouteContext {
            order_id: OrderId("PO-1".to_owned()),
            order_amount: Decimal::from(amount),
            company_id: company(),
            acting_user_id: UserId("u-actor".to_owned()),
            acting_role: role,
            priority: None,
        }
    }

    fn router(store: &InMemoryWorkflowStore) -> ApprovalRouter<InMemoryWorkflowStore> {
        ApprovalRouter::new(Arc::new(store.clone()), RouterSettings::default())
    }

    async fn staged_store(skip_lower_stages: bool) -> InMemoryWorkflowStore {
        let store = InMemoryWorkflowStore::default();
        let mut policy = PolicyDraft::staged(company());
        policy.skip_lower_stages = skip_lower_stages;
        store.upsert_policy(policy).await.expect("policy");

        store
            .create_template(
                StepTemplateDraft::new(company(), "standard", 1, Role::ProjectManager)
                    .with_range(Decimal::ZERO, Some(Decimal::from(10_000_000)))
                    .skippable(),
            )
            .await
            .expect("pm step");
        store
            .create_template(
                StepTemplateDraft::new(company(), "standard", 2, Role::HqManagement)
                    .with_range(Decimal::from(10_000_000), None),
            )
            .await
            .expect("hq step");
        store
    }

    #[tokio::test]
    async fn missing_policy_defaults_to_admin_only_direct_approval() {
        let store = InMemoryWorkflowStore::default();
        let router = router(&store);

        for (role, expected) in [(Role::Admin, true), (Role::Executive, false)] {
            let decision = router.determine_route(&context(1_000, role)).await;
            assert_eq!(decision.approval_mode, ApprovalMode::Direct);
            assert_eq!(decision.can_direct_approve, expected);
            assert_eq!(decision.basis, RouteBasis::NoPolicy);
            assert!(decision.reasoning.contains("admin-only"));
        }
    }

    #[tokio::test]
    async fn direct_policy_authorizes_listed_roles_and_previews_peers() {
        let store = InMemoryWorkflowStore::default();
        for index in 0..12 {
            store.add_user(&format!("u-exec-{index}"), "Exec", Role::Executive);
        }
        store.add_user("u-pm", "PM", Role::ProjectManager);
        store
            .upsert_policy(PolicyDraft::direct(company(), vec![Role::Executive]))
            .await
            .expect("policy");
        let router = router(&store);

        let decision = router.determine_route(&context(5_000_000, Role::Executive)).await;
        assert!(decision.can_direct_approve);
        assert_eq!(decision.direct_approval_users.len(), 10);
        assert!(decision.reasoning.contains("is authorized"));

        let denied = router.determine_route(&context(5_000_000, Role::ProjectManager)).await;
        assert!(!denied.can_direct_approve);
        assert_eq!(denied.direct_approval_users, vec![UserId("u-pm".to_owned())]);
        assert!(denied.reasoning.contains("not authorized"));
    }

    #[tokio::test]
    async fn small_order_routes_to_project_manager_step_only() {
        let store = staged_store(false).await;
        let decision = router(&store).determine_route(&context(5_000_000, Role::FieldWorker)).await;

        assert_eq!(decision.approval_mode, ApprovalMode::Staged);
        assert!(!decision.can_direct_approve);
        let roles =
            decision.staged_approval_steps.iter().map(|s| s.required_role).collect::<Vec<_>>();
        assert_eq!(roles, vec![Role::ProjectManager]);
        assert_eq!(decision.template_name.as_deref(), Some("standard"));
        assert!(decision.reasoning.contains("5000000"));
    }

    #[tokio::test]
    async fn large_order_routes_to_hq_step_only() {
        let store = staged_store(false).await;
        let decision =
            router(&store).determine_route(&context(50_000_000, Role::FieldWorker)).await;

        let roles =
            decision.staged_approval_steps.iter().map(|s| s.required_role).collect::<Vec<_>>();
        assert_eq!(roles, vec![Role::HqManagement]);
    }

    #[tokio::test]
    async fn staged_policy_without_covering_template_falls_back() {
        let store = InMemoryWorkflowStore::default();
        store.upsert_policy(PolicyDraft::staged(company())).await.expect("policy");
        store
            .create_template(
                StepTemplateDraft::new(company(), "small", 1, Role::ProjectManager)
                    .with_range(Decimal::ZERO, Some(Decimal::from(1_000))),
            )
            .await
            .expect("template");
        let router = router(&store);

        for role in Role::ALL {
            let decision = router.determine_route(&context(5_000, role)).await;
            assert_eq!(decision.approval_mode, ApprovalMode::Direct);
            assert_eq!(decision.can_direct_approve, role == Role::Admin);
            assert_eq!(decision.basis, RouteBasis::NoMatchingTemplate);
        }
    }

    #[tokio::test]
    async fn high_priority_drops_optional_steps_when_more_than_two_match() {
        let store = InMemoryWorkflowStore::default();
        store.upsert_policy(PolicyDraft::staged(company())).await.expect("policy");
        for (order, role, optional) in [
            (1, Role::ProjectManager, true),
            (2, Role::HqManagement, false),
            (3, Role::Executive, true),
            (4, Role::Admin, false),
        ] {
            let mut draft = StepTemplateDraft::new(company(), "full", order, role);
            draft.is_optional = optional;
            store.create_template(draft).await.expect("template");
        }
        let router = router(&store);

        let mut urgent = context(1_000, Role::FieldWorker);
        urgent.priority = Some(Priority::High);
        let decision = router.determine_route(&urgent).await;
        assert_eq!(decision.staged_approval_steps.len(), 2);
        assert!(decision.staged_approval_steps.iter().all(|step| !step.is_optional));
        assert!(decision.reasoning.contains("optional steps were dropped"));

        let normal = router.determine_route(&context(1_000, Role::FieldWorker)).await;
        assert_eq!(normal.staged_approval_steps.len(), 4);
    }

    #[tokio::test]
    async fn high_priority_keeps_optional_steps_at_or_below_threshold() {
        let store = InMemoryWorkflowStore::default();
        store.upsert_policy(PolicyDraft::staged(company())).await.expect("policy");
        store
            .create_template(
                StepTemplateDraft::new(company(), "pair", 1, Role::ProjectManager).optional(),
            )
            .await
            .expect("template");
        store
            .create_template(StepTemplateDraft::new(company(), "pair", 2, Role::Executive))
            .await
            .expect("template");

        let mut urgent = context(1_000, Role::FieldWorker);
        urgent.priority = Some(Priority::High);
        let decision = router(&store).determine_route(&urgent).await;
        assert_eq!(decision.staged_approval_steps.len(), 2);
    }

    #[tokio::test]
    async fn authority_covering_amount_skips_lower_skippable_steps() {
        let store = staged_store(true).await;
        store
            .create_template(
                StepTemplateDraft::new(company(), "standard", 3, Role::ProjectManager)
                    .with_range(Decimal::from(10_000_000), None)
                    .skippable(),
            )
            .await
            .expect("pm step for large orders");
        store
            .create_authority(AuthorityDraft::new(Role::HqManagement, Decimal::from(100_000_000)))
            .await
            .expect("authority");

        let decision =
            router(&store).determine_route(&context(50_000_000, Role::HqManagement)).await;

        let roles =
            decision.staged_approval_steps.iter().map(|s| s.required_role).collect::<Vec<_>>();
        assert_eq!(roles, vec![Role::HqManagement]);
        assert_eq!(decision.skipped_step_ids.len(), 1);
        assert!(decision.reasoning.contains("skipped"));
    }

    #[tokio::test]
    async fn authority_below_amount_skips_nothing() {
        let store = staged_store(true).await;
        store
            .create_authority(AuthorityDraft::new(Role::Executive, Decimal::from(1_000_000)))
            .await
            .expect("authority");

        let decision = router(&store).determine_route(&context(5_000_000, Role::Executive)).await;
        assert_eq!(decision.staged_approval_steps.len(), 1);
        assert!(decision.skipped_step_ids.is_empty());
    }

    #[tokio::test]
    async fn skipping_every_step_fails_closed() {
        let store = staged_store(true).await;
        store
            .create_authority(AuthorityDraft::new(Role::Executive, Decimal::from(100_000_000)))
            .await
            .expect("authority");

        let decision = router(&store).determine_route(&context(5_000_000, Role::Executive)).await;
        assert_eq!(decision.approval_mode, ApprovalMode::Direct);
        assert!(!decision.can_direct_approve);
        assert_eq!(decision.basis, RouteBasis::AllStepsRemoved);
    }

    #[tokio::test]
    async fn store_failure_degrades_to_safe_default_and_is_audited() {
        let store = staged_store(false).await;
        store.set_unavailable(true);
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some(OrderId("PO-1".to_owned())), "req-9", "u-actor");

        let decision = router(&store)
            .determine_route_with_audit(&context(5_000_000, Role::Admin), &sink, &audit)
            .await;

        assert_eq!(decision.approval_mode, ApprovalMode::Direct);
        assert!(decision.can_direct_approve);
        assert_eq!(decision.basis, RouteBasis::Degraded);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "routing.degraded");
        assert_eq!(events[0].outcome, AuditOutcome::Failed);
    }

    #[tokio::test]
    async fn non_positive_amount_degrades_instead_of_failing() {
        let store = staged_store(false).await;
        let decision = router(&store).determine_route(&context(0, Role::ProjectManager)).await;
        assert_eq!(decision.basis, RouteBasis::Degraded);
        assert!(!decision.can_direct_approve);
        assert!(decision.reasoning.contains("must be positive"));
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert!("urgent".parse::<Priority>().is_err());
    }
}
