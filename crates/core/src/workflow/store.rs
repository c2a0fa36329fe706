//! Persistence ports consumed by the router and tracker.
//!
//! `poflow-db` implements these over SQLite; [`super::memory::InMemoryWorkflowStore`]
//! implements them for tests and embedding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::authority::{ApprovalAuthority, AuthorityDraft, AuthorityId};
use crate::domain::directory::DirectoryUser;
use crate::domain::order::{CompanyId, OrderId, UserId};
use crate::domain::policy::{PolicyDraft, WorkflowPolicy};
use crate::domain::role::Role;
use crate::domain::step::{StepDecision, StepInstance, StepInstanceId, StepNote};
use crate::domain::template::{StepTemplate, StepTemplateDraft, StepTemplateId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("an active approval authority already exists for role `{role}`")]
    DuplicateAuthority { role: Role },
    #[error("template `{template_name}` already has an active step {step_order}")]
    DuplicateStepOrder { template_name: String, step_order: u32 },
    #[error("order `{order_id}` already has approval steps")]
    StepsAlreadyInstantiated { order_id: String },
    #[error("{0} was not found")]
    NotFound(String),
}

#[async_trait]
pub trait AuthorityRegistry: Send + Sync {
    async fn find_active_authority(
        &self,
        role: Role,
    ) -> Result<Option<ApprovalAuthority>, StoreError>;

    async fn list_authorities(&self) -> Result<Vec<ApprovalAuthority>, StoreError>;

    /// Fails with [`StoreError::DuplicateAuthority`] when the draft is active and the
    /// role already has an active row.
    async fn create_authority(&self, draft: AuthorityDraft)
        -> Result<ApprovalAuthority, StoreError>;

    /// Same uniqueness rule as `create_authority` when the draft re-activates a role.
    async fn update_authority(
        &self,
        id: &AuthorityId,
        draft: AuthorityDraft,
    ) -> Result<ApprovalAuthority, StoreError>;

    async fn deactivate_authority(&self, id: &AuthorityId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn find_active_policy(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<WorkflowPolicy>, StoreError>;

    /// Supersedes the company's active policy in place, or inserts the first one.
    async fn upsert_policy(&self, draft: PolicyDraft) -> Result<WorkflowPolicy, StoreError>;
}

#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    /// Active steps whose amount range covers `amount`, ordered by `step_order`.
    async fn matching_steps(
        &self,
        company_id: &CompanyId,
        amount: Decimal,
    ) -> Result<Vec<StepTemplate>, StoreError>;

    /// Active steps ordered by template name, then `step_order`.
    async fn list_templates(
        &self,
        company_id: &CompanyId,
        template_name: Option<&str>,
    ) -> Result<Vec<StepTemplate>, StoreError>;

    async fn find_template(&self, id: &StepTemplateId)
        -> Result<Option<StepTemplate>, StoreError>;

    /// Fails with [`StoreError::DuplicateStepOrder`] when the template already has an
    /// active step at the same position.
    async fn create_template(&self, draft: StepTemplateDraft) -> Result<StepTemplate, StoreError>;

    /// Deactivates `id` and inserts its replacement; the original row is left intact.
    async fn revise_template(
        &self,
        id: &StepTemplateId,
        draft: StepTemplateDraft,
    ) -> Result<StepTemplate, StoreError>;

    async fn deactivate_template(&self, id: &StepTemplateId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait StepInstanceStore: Send + Sync {
    /// Inserts one order's step set. The existence check and the insert are a single
    /// atomic unit: fails with [`StoreError::StepsAlreadyInstantiated`] when the order
    /// already has active instances, and then writes nothing.
    async fn insert_instances(&self, instances: Vec<StepInstance>) -> Result<(), StoreError>;

    /// Active instances of an order ordered by `step_order`.
    async fn list_instances(&self, order_id: &OrderId) -> Result<Vec<StepInstance>, StoreError>;

    async fn find_instance(&self, id: &StepInstanceId)
        -> Result<Option<StepInstance>, StoreError>;

    /// Conditional update that only succeeds while the row is still `pending`.
    ///
    /// Returns `Ok(None)` when no row was updated, either because the id is unknown or
    /// because another writer decided the step first.
    async fn transition_instance(
        &self,
        id: &StepInstanceId,
        decision: StepDecision,
        acting_user_id: &UserId,
        note: &StepNote,
        at: DateTime<Utc>,
    ) -> Result<Option<StepInstance>, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn users_with_role(
        &self,
        role: Role,
        limit: usize,
    ) -> Result<Vec<DirectoryUser>, StoreError>;
}

/// Everything the router and tracker need from persistence.
pub trait WorkflowStore:
    AuthorityRegistry + PolicyStore + TemplateCatalog + StepInstanceStore + UserDirectory
{
}

impl<T> WorkflowStore for T where
    T: AuthorityRegistry + PolicyStore + TemplateCatalog + StepInstanceStore + UserDirectory
{
}
