use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::authority::{ApprovalAuthority, AuthorityDraft, AuthorityId};
use crate::domain::policy::{ApprovalMode, PolicyDraft, WorkflowPolicy};
use crate::domain::template::{StepTemplate, StepTemplateDraft, StepTemplateId};
use crate::errors::{ApplicationError, DomainError};
use crate::workflow::store::WorkflowStore;

/// Validated, audited writes to the authority registry, policy store and step catalog.
pub struct WorkflowAdmin<S, A: ?Sized> {
    store: Arc<S>,
    sink: Arc<A>,
}

impl<S, A> WorkflowAdmin<S, A>
where
    S: WorkflowStore,
    A: AuditSink + ?Sized,
{
    pub fn new(store: Arc<S>, sink: Arc<A>) -> Self {
        Self { store, sink }
    }

    pub async fn register_authority(
        &self,
        draft: AuthorityDraft,
        audit: &AuditContext,
    ) -> Result<ApprovalAuthority, ApplicationError> {
        validate_authority(&draft)?;
        let result = self.store.create_authority(draft).await.map_err(ApplicationError::from);
        self.record(audit, "authority.registered", &result, |row| {
            vec![("role", row.role.as_str().to_owned()), ("max_amount", row.max_amount.to_string())]
        });
        result
    }

    pub async fn update_authority(
        &self,
        id: &AuthorityId,
        draft: AuthorityDraft,
        audit: &AuditContext,
    ) -> Result<ApprovalAuthority, ApplicationError> {
        validate_authority(&draft)?;
        let result = self.store.update_authority(id, draft).await.map_err(ApplicationError::from);
        self.record(audit, "authority.updated", &result, |row| {
            vec![("role", row.role.as_str().to_owned()), ("active", row.active.to_string())]
        });
        result
    }

    pub async fn retire_authority(
        &self,
        id: &AuthorityId,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let result = self.store.deactivate_authority(id).await.map_err(ApplicationError::from);
        self.record(audit, "authority.retired", &result, |_| vec![("authority_id", id.0.clone())]);
        result
    }

    /// Replaces the company's active policy. Direct mode needs at least one role.
    pub async fn set_policy(
        &self,
        draft: PolicyDraft,
        audit: &AuditContext,
    ) -> Result<WorkflowPolicy, ApplicationError> {
        if draft.approval_mode == ApprovalMode::Direct && draft.direct_approval_roles.is_empty() {
            return Err(DomainError::InvariantViolation(
                "direct approval mode requires at least one approving role".to_owned(),
            )
            .into());
        }

        let result = self.store.upsert_policy(draft).await.map_err(ApplicationError::from);
        self.record(audit, "policy.updated", &result, |policy| {
            vec![
                ("company_id", policy.company_id.0.clone()),
                ("approval_mode", policy.approval_mode.as_str().to_owned()),
            ]
        });
        result
    }

    pub async fn add_step(
        &self,
        draft: StepTemplateDraft,
        audit: &AuditContext,
    ) -> Result<StepTemplate, ApplicationError> {
        draft.validate().map_err(DomainError::InvariantViolation)?;
        let result = self.store.create_template(draft).await.map_err(ApplicationError::from);
        self.record(audit, "template.step_added", &result, template_fields);
        result
    }

    /// Supersedes a step; the previous row stays in the catalog as inactive history.
    pub async fn revise_step(
        &self,
        id: &StepTemplateId,
        draft: StepTemplateDraft,
        audit: &AuditContext,
    ) -> Result<StepTemplate, ApplicationError> {
        draft.validate().map_err(DomainError::InvariantViolation)?;
        let result = self.store.revise_template(id, draft).await.map_err(ApplicationError::from);
        self.record(audit, "template.step_revised", &result, |step| {
            let mut fields = template_fields(step);
            fields.push(("replaces", id.0.clone()));
            fields
        });
        result
    }

    pub async fn retire_step(
        &self,
        id: &StepTemplateId,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let result = self.store.deactivate_template(id).await.map_err(ApplicationError::from);
        self.record(audit, "template.step_retired", &result, |_| {
            vec![("template_id", id.0.clone())]
        });
        result
    }

    fn record<T, F>(
        &self,
        audit: &AuditContext,
        event_type: &str,
        result: &Result<T, ApplicationError>,
        fields: F,
    ) where
        F: FnOnce(&T) -> Vec<(&'static str, String)>,
    {
        let event = match result {
            Ok(value) => {
                info!(
                    event_name = event_type,
                    actor = %audit.actor,
                    "workflow configuration changed"
                );
                fields(value).into_iter().fold(
                    audit.event(event_type, AuditCategory::Configuration, AuditOutcome::Success),
                    |event, (key, value)| event.with_metadata(key, value),
                )
            }
            Err(error) => audit
                .event(event_type, AuditCategory::Configuration, AuditOutcome::Rejected)
                .with_metadata("error", error.to_string()),
        };
        self.sink.emit(event);
    }
}

fn validate_authority(draft: &AuthorityDraft) -> Result<(), DomainError> {
    if draft.max_amount < Decimal::ZERO {
        return Err(DomainError::InvariantViolation(format!(
            "approval authority for `{}` must have a non-negative max amount",
            draft.role
        )));
    }
    if let Some(limit) = draft.direct_approve_limit {
        if limit < Decimal::ZERO {
            return Err(DomainError::InvariantViolation(
                "direct approve limit must be non-negative".to_owned(),
            ));
        }
    }
    Ok(())
}

fn template_fields(step: &StepTemplate) -> Vec<(&'static str, String)> {
    vec![
        ("template_name", step.template_name.clone()),
        ("step_order", step.step_order.to_string()),
        ("required_role", step.required_role.as_str().to_owned()),
    ]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::WorkflowAdmin;
    use crate::audit::{AuditCategory, AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::domain::authority::AuthorityDraft;
    use crate::domain::order::CompanyId;
    use crate::domain::policy::PolicyDraft;
    use crate::domain::role::Role;
    use crate::domain::template::{StepTemplateDraft, StepTemplateId};
    use crate::errors::{ApplicationError, DomainError};
    use crate::workflow::memory::InMemoryWorkflowStore;
    use crate::workflow::store::{AuthorityRegistry, TemplateCatalog};

    type Admin = WorkflowAdmin<InMemoryWorkflowStore, InMemoryAuditSink>;

    fn admin() -> (InMemoryWorkflowStore, Arc<InMemoryAuditSink>, Admin) {
        let store = InMemoryWorkflowStore::default();
        let sink = Arc::new(InMemoryAuditSink::default());
        let admin = WorkflowAdmin::new(Arc::new(store.clone()), Arc::clone(&sink));
        (store, sink, admin)
    }

    fn audit() -> AuditContext {
        AuditContext::new(None, "req-admin", "u-admin")
    }

    #[tokio::test]
    async fn duplicate_authority_is_a_domain_conflict_and_audited() {
        let (_, sink, admin) = admin();
        admin
            .register_authority(
                AuthorityDraft::new(Role::Executive, Decimal::from(1_000)),
                &audit(),
            )
            .await
            .expect("first");
        let error = admin
            .register_authority(AuthorityDraft::new(Role::Executive, Decimal::from(5)), &audit())
            .await
            .expect_err("duplicate");

        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::DuplicateAuthority { role: Role::Executive })
        );
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.category == AuditCategory::Configuration));
        assert_eq!(events[1].outcome, AuditOutcome::Rejected);
    }

    #[tokio::test]
    async fn invalid_step_range_is_rejected_before_the_store() {
        let (store, sink, admin) = admin();
        let company = CompanyId("c-1".to_owned());
        let draft = StepTemplateDraft::new(company.clone(), "standard", 1, Role::Executive)
            .with_range(Decimal::from(10), Some(Decimal::from(5)));

        let error = admin.add_step(draft, &audit()).await.expect_err("invalid range");
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvariantViolation(_))));
        assert!(store.list_templates(&company, None).await.expect("list").is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn direct_policy_without_roles_is_rejected() {
        let (_, _, admin) = admin();
        let error = admin
            .set_policy(PolicyDraft::direct(CompanyId("c-1".to_owned()), Vec::new()), &audit())
            .await
            .expect_err("no roles");
        assert!(error.to_string().contains("at least one approving role"));
    }

    #[tokio::test]
    async fn revised_step_records_what_it_replaces() {
        let (_, sink, admin) = admin();
        let company = CompanyId("c-1".to_owned());
        let original = admin
            .add_step(
                StepTemplateDraft::new(company.clone(), "standard", 1, Role::ProjectManager),
                &audit(),
            )
            .await
            .expect("add");
        admin
            .revise_step(
                &original.id,
                StepTemplateDraft::new(company, "standard", 1, Role::HqManagement),
                &audit(),
            )
            .await
            .expect("revise");

        let events = sink.events();
        assert_eq!(events[1].event_type, "template.step_revised");
        assert_eq!(events[1].metadata.get("replaces"), Some(&original.id.0));
        assert_eq!(
            events[1].metadata.get("required_role").map(String::as_str),
            Some("hq_management")
        );
    }

    #[tokio::test]
    async fn retired_authority_frees_its_role_for_a_replacement() {
        let (store, sink, admin) = admin();
        let original = admin
            .register_authority(
                AuthorityDraft::new(Role::HqManagement, Decimal::from(100)),
                &audit(),
            )
            .await
            .expect("register");
        let raised = admin
            .update_authority(
                &original.id,
                AuthorityDraft::new(Role::HqManagement, Decimal::from(500)),
                &audit(),
            )
            .await
            .expect("update");
        assert_eq!(raised.max_amount, Decimal::from(500));
        assert_eq!(raised.created_at, original.created_at);

        admin.retire_authority(&original.id, &audit()).await.expect("retire");
        assert!(store.find_active_authority(Role::HqManagement).await.expect("find").is_none());

        admin
            .register_authority(
                AuthorityDraft::new(Role::HqManagement, Decimal::from(50)),
                &audit(),
            )
            .await
            .expect("replacement");
        let types = sink.events().into_iter().map(|event| event.event_type).collect::<Vec<_>>();
        assert_eq!(
            types,
            [
                "authority.registered",
                "authority.updated",
                "authority.retired",
                "authority.registered"
            ]
        );
    }

    #[tokio::test]
    async fn retiring_an_unknown_step_is_audited_as_rejected() {
        let (_, sink, admin) = admin();
        let error = admin
            .retire_step(&StepTemplateId("missing".to_owned()), &audit())
            .await
            .expect_err("unknown step");

        assert!(error.to_string().contains("missing"));
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, AuditOutcome::Rejected);
    }
}
