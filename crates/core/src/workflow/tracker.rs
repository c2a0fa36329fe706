use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::order::{CompanyId, OrderId, UserId};
use crate::domain::role::Role;
use crate::domain::step::{StepDecision, StepInstance, StepInstanceId, StepNote, StepStatus};
use crate::domain::template::StepTemplate;
use crate::errors::{ApplicationError, DomainError};
use crate::workflow::router::{ApprovalRouter, RouteContext, RouterSettings};
use crate::workflow::store::WorkflowStore;

/// Authenticated identity deciding a step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self { user_id: UserId(user_id.into()), role }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalProgress {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub progress_percentage: u8,
    pub current_step: Option<StepInstance>,
}

/// Overall state of an order's staged approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    /// No step instances exist, so nothing stands between the order and approval.
    NotRequired,
    InProgress,
    Approved,
    Rejected,
}

fn progress_of(steps: &[StepInstance]) -> ApprovalProgress {
    let total_steps = steps.len();
    let completed_steps = steps.iter().filter(|step| step.status.counts_as_completed()).count();
    // Round half up: floor(100c/t + 1/2) == floor((200c + t) / 2t).
    let progress_percentage = if total_steps == 0 {
        0
    } else {
        ((200 * completed_steps + total_steps) / (2 * total_steps)) as u8
    };

    ApprovalProgress {
        total_steps,
        completed_steps,
        progress_percentage,
        current_step: steps.iter().find(|step| step.is_pending()).cloned(),
    }
}

fn outcome_of(steps: &[StepInstance]) -> ApprovalOutcome {
    if steps.is_empty() {
        ApprovalOutcome::NotRequired
    } else if steps.iter().any(|step| step.status == StepStatus::Rejected) {
        ApprovalOutcome::Rejected
    } else if steps.iter().any(StepInstance::is_pending) {
        ApprovalOutcome::InProgress
    } else {
        ApprovalOutcome::Approved
    }
}

/// Materializes routed steps for an order and moves them through their lifecycle.
pub struct StepTracker<S> {
    store: Arc<S>,
    router: ApprovalRouter<S>,
}

impl<S> StepTracker<S>
where
    S: WorkflowStore,
{
    pub fn new(store: Arc<S>, settings: RouterSettings) -> Self {
        let router = ApprovalRouter::new(Arc::clone(&store), settings);
        Self { store, router }
    }

    pub fn router(&self) -> &ApprovalRouter<S> {
        &self.router
    }

    /// Routes the order and persists one pending instance per staged step.
    ///
    /// Direct routes create nothing and return an empty list. `order_id` must be the
    /// order the context describes.
    pub async fn create_instances(
        &self,
        order_id: &OrderId,
        context: &RouteContext,
    ) -> Result<Vec<StepInstance>, ApplicationError> {
        if order_id != &context.order_id {
            return Err(DomainError::InvariantViolation(format!(
                "route context is for order `{}`, not `{order_id}`",
                context.order_id
            ))
            .into());
        }

        let decision = self.router.determine_route(context).await;
        if !decision.is_staged() {
            info!(
                event_name = "workflow.steps.not_required",
                order_id = %order_id,
                approval_mode = %decision.approval_mode,
                "order routed to direct approval; no step instances created"
            );
            return Ok(Vec::new());
        }

        self.persist_steps(order_id, &decision.staged_approval_steps).await
    }

    /// Instantiates every active step of a named template, bypassing amount routing.
    pub async fn create_instances_from_template(
        &self,
        order_id: &OrderId,
        company_id: &CompanyId,
        template_name: &str,
    ) -> Result<Vec<StepInstance>, ApplicationError> {
        let steps = self.store.list_templates(company_id, Some(template_name)).await?;
        self.persist_steps(order_id, &steps).await
    }

    async fn persist_steps(
        &self,
        order_id: &OrderId,
        steps: &[StepTemplate],
    ) -> Result<Vec<StepInstance>, ApplicationError> {
        if steps.is_empty() {
            return Err(DomainError::NoStepsDefined { order_id: order_id.0.clone() }.into());
        }

        let now = Utc::now();
        let instances = steps
            .iter()
            .map(|template| {
                StepInstance::pending_from_template(
                    StepInstanceId(Uuid::new_v4().to_string()),
                    order_id.clone(),
                    template,
                    now,
                )
            })
            .collect::<Vec<_>>();

        self.store.insert_instances(instances.clone()).await?;
        info!(
            event_name = "workflow.steps.created",
            order_id = %order_id,
            step_count = instances.len(),
            "approval step instances created"
        );
        Ok(instances)
    }

    pub async fn list_steps(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<StepInstance>, ApplicationError> {
        Ok(self.store.list_instances(order_id).await?)
    }

    /// Lowest-ordered pending step, if any.
    pub async fn get_next_step(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<StepInstance>, ApplicationError> {
        let steps = self.store.list_instances(order_id).await?;
        Ok(steps.into_iter().find(StepInstance::is_pending))
    }

    /// True once no step is pending. A rejected step still counts as complete here;
    /// use [`StepTracker::outcome`] to tell approval from rejection.
    pub async fn is_complete(&self, order_id: &OrderId) -> Result<bool, ApplicationError> {
        let steps = self.store.list_instances(order_id).await?;
        Ok(!steps.iter().any(StepInstance::is_pending))
    }

    pub async fn get_progress(
        &self,
        order_id: &OrderId,
    ) -> Result<ApprovalProgress, ApplicationError> {
        let steps = self.store.list_instances(order_id).await?;
        Ok(progress_of(&steps))
    }

    pub async fn outcome(&self, order_id: &OrderId) -> Result<ApprovalOutcome, ApplicationError> {
        let steps = self.store.list_instances(order_id).await?;
        Ok(outcome_of(&steps))
    }

    /// Records a terminal decision on a pending step.
    ///
    /// The actor's role must match or outrank the step's required role. The store
    /// update is conditional on the step still being pending, so of two concurrent
    /// callers exactly one succeeds and the other gets `InvalidTransition`.
    pub async fn advance_step(
        &self,
        instance_id: &StepInstanceId,
        decision: StepDecision,
        actor: &Actor,
        note: StepNote,
    ) -> Result<StepInstance, ApplicationError> {
        let instance = self
            .store
            .find_instance(instance_id)
            .await?
            .ok_or_else(|| DomainError::StepInstanceNotFound(instance_id.0.clone()))?;

        if !instance.is_pending() {
            return Err(DomainError::InvalidTransition {
                instance_id: instance_id.0.clone(),
                current: instance.status,
            }
            .into());
        }

        if !actor.role.can_act_for(instance.required_role) {
            return Err(DomainError::UnauthorizedActor {
                actor_role: actor.role,
                required_role: instance.required_role,
            }
            .into());
        }

        let note = note.normalized();
        let updated = self
            .store
            .transition_instance(instance_id, decision, &actor.user_id, &note, Utc::now())
            .await?;

        match updated {
            Some(step) => {
                info!(
                    event_name = "workflow.step.advanced",
                    order_id = %step.order_id,
                    instance_id = %step.id,
                    step_order = step.step_order,
                    status = %step.status,
                    actor = %actor.user_id,
                    "approval step decided"
                );
                Ok(step)
            }
            None => {
                let current = self
                    .store
                    .find_instance(instance_id)
                    .await?
                    .ok_or_else(|| DomainError::StepInstanceNotFound(instance_id.0.clone()))?;
                warn!(
                    event_name = "workflow.step.lost_race",
                    instance_id = %instance_id,
                    current_status = %current.status,
                    actor = %actor.user_id,
                    "approval step was decided by another writer first"
                );
                Err(DomainError::InvalidTransition {
                    instance_id: instance_id.0.clone(),
                    current: current.status,
                }
                .into())
            }
        }
    }

    pub async fn advance_step_with_audit<A>(
        &self,
        instance_id: &StepInstanceId,
        decision: StepDecision,
        actor: &Actor,
        note: StepNote,
        sink: &A,
        audit: &AuditContext,
    ) -> Result<StepInstance, ApplicationError>
    where
        A: AuditSink + ?Sized,
    {
        let result = self.advance_step(instance_id, decision, actor, note).await;
        let event = match &result {
            Ok(step) => audit
                .event("step.advanced", AuditCategory::Step, AuditOutcome::Success)
                .with_metadata("step_order", step.step_order.to_string())
                .with_metadata("to", step.status.as_str()),
            Err(error) => audit
                .event("step.advance_rejected", AuditCategory::Step, AuditOutcome::Rejected)
                .with_metadata("error", error.to_string()),
        };

        sink.emit(
            event
                .with_metadata("instance_id", instance_id.0.clone())
                .with_metadata("decision", decision.as_str())
                .with_metadata("actor_role", actor.role.as_str()),
        );
        result
    }
}
