use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::authority::{ApprovalAuthority, AuthorityDraft, AuthorityId};
use crate::domain::directory::DirectoryUser;
use crate::domain::order::{CompanyId, OrderId, UserId};
use crate::domain::policy::{PolicyDraft, PolicyId, WorkflowPolicy};
use crate::domain::role::Role;
use crate::domain::step::{StepDecision, StepInstance, StepInstanceId, StepNote};
use crate::domain::template::{StepTemplate, StepTemplateDraft, StepTemplateId};
use crate::workflow::store::{
    AuthorityRegistry, PolicyStore, StepInstanceStore, StoreError, TemplateCatalog, UserDirectory,
};

#[derive(Debug, Default)]
struct State {
    authorities: Vec<ApprovalAuthority>,
    policies: Vec<WorkflowPolicy>,
    templates: Vec<StepTemplate>,
    instances: Vec<StepInstance>,
    users: Vec<DirectoryUser>,
}

/// Process-local implementation of every store port.
///
/// Clones share state. Each operation runs under one lock, so `transition_instance`
/// has the same compare-and-swap behavior as the SQL store.
#[derive(Clone, Debug, Default)]
pub struct InMemoryWorkflowStore {
    state: Arc<Mutex<State>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryWorkflowStore {
    pub fn with_users(users: Vec<DirectoryUser>) -> Self {
        let store = Self::default();
        store.guard().users = users;
        store
    }

    pub fn add_user(&self, id: &str, name: &str, role: Role) {
        self.guard().users.push(DirectoryUser {
            id: UserId(id.to_owned()),
            name: name.to_owned(),
            role,
        });
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn guard(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_owned()));
        }
        Ok(self.guard())
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn has_active_authority(state: &State, role: Role, except: Option<&AuthorityId>) -> bool {
    state
        .authorities
        .iter()
        .any(|row| row.active && row.role == role && Some(&row.id) != except)
}

fn has_active_step(
    state: &State,
    draft: &StepTemplateDraft,
    except: Option<&StepTemplateId>,
) -> bool {
    state.templates.iter().any(|row| {
        row.active
            && row.company_id == draft.company_id
            && row.template_name == draft.template_name
            && row.step_order == draft.step_order
            && Some(&row.id) != except
    })
}

#[async_trait]
impl AuthorityRegistry for InMemoryWorkflowStore {
    async fn find_active_authority(
        &self,
        role: Role,
    ) -> Result<Option<ApprovalAuthority>, StoreError> {
        let state = self.lock()?;
        Ok(state.authorities.iter().find(|row| row.active && row.role == role).cloned())
    }

    async fn list_authorities(&self) -> Result<Vec<ApprovalAuthority>, StoreError> {
        let state = self.lock()?;
        let mut rows = state.authorities.clone();
        rows.sort_by_key(|row| row.role);
        Ok(rows)
    }

    async fn create_authority(
        &self,
        draft: AuthorityDraft,
    ) -> Result<ApprovalAuthority, StoreError> {
        let mut state = self.lock()?;
        if draft.active && has_active_authority(&state, draft.role, None) {
            return Err(StoreError::DuplicateAuthority { role: draft.role });
        }

        let authority = ApprovalAuthority::from_draft(AuthorityId(new_id()), draft, Utc::now());
        state.authorities.push(authority.clone());
        Ok(authority)
    }

    async fn update_authority(
        &self,
        id: &AuthorityId,
        draft: AuthorityDraft,
    ) -> Result<ApprovalAuthority, StoreError> {
        let mut state = self.lock()?;
        if draft.active && has_active_authority(&state, draft.role, Some(id)) {
            return Err(StoreError::DuplicateAuthority { role: draft.role });
        }

        let row = state
            .authorities
            .iter_mut()
            .find(|row| &row.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("approval authority `{}`", id.0)))?;
        let created_at = row.created_at;
        *row = ApprovalAuthority::from_draft(id.clone(), draft, Utc::now());
        row.created_at = created_at;
        Ok(row.clone())
    }

    async fn deactivate_authority(&self, id: &AuthorityId) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let row = state
            .authorities
            .iter_mut()
            .find(|row| &row.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("approval authority `{}`", id.0)))?;
        row.active = false;
        row.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for InMemoryWorkflowStore {
    async fn find_active_policy(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<WorkflowPolicy>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .policies
            .iter()
            .filter(|row| row.active && &row.company_id == company_id)
            .max_by_key(|row| row.created_at)
            .cloned())
    }

    async fn upsert_policy(&self, draft: PolicyDraft) -> Result<WorkflowPolicy, StoreError> {
        let mut state = self.lock()?;
        let now = Utc::now();

        if let Some(existing) = state
            .policies
            .iter_mut()
            .find(|row| row.active && row.company_id == draft.company_id)
        {
            let created_by = existing.created_by.clone();
            let mut updated = draft.into_policy(existing.id.clone(), existing.created_at, now);
            if updated.created_by.is_none() {
                updated.created_by = created_by;
            }
            *existing = updated.clone();
            return Ok(updated);
        }

        let policy = draft.into_policy(PolicyId(new_id()), now, now);
        state.policies.push(policy.clone());
        Ok(policy)
    }
}

#[async_trait]
impl TemplateCatalog for InMemoryWorkflowStore {
    async fn matching_steps(
        &self,
        company_id: &CompanyId,
        amount: Decimal,
    ) -> Result<Vec<StepTemplate>, StoreError> {
        let state = self.lock()?;
        let mut rows = state
            .templates
            .iter()
            .filter(|row| row.active && &row.company_id == company_id && row.covers(amount))
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|left, right| {
            left.step_order.cmp(&right.step_order).then_with(|| left.id.cmp(&right.id))
        });
        Ok(rows)
    }

    async fn list_templates(
        &self,
        company_id: &CompanyId,
        template_name: Option<&str>,
    ) -> Result<Vec<StepTemplate>, StoreError> {
        let state = self.lock()?;
        let mut rows = state
            .templates
            .iter()
            .filter(|row| row.active && &row.company_id == company_id)
            .filter(|row| template_name.map_or(true, |name| row.template_name == name))
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|left, right| {
            left.template_name
                .cmp(&right.template_name)
                .then_with(|| left.step_order.cmp(&right.step_order))
        });
        Ok(rows)
    }

    async fn find_template(
        &self,
        id: &StepTemplateId,
    ) -> Result<Option<StepTemplate>, StoreError> {
        let state = self.lock()?;
        Ok(state.templates.iter().find(|row| &row.id == id).cloned())
    }

    async fn create_template(&self, draft: StepTemplateDraft) -> Result<StepTemplate, StoreError> {
        let mut state = self.lock()?;
        if has_active_step(&state, &draft, None) {
            return Err(StoreError::DuplicateStepOrder {
                template_name: draft.template_name,
                step_order: draft.step_order,
            });
        }

        let template = StepTemplate::from_draft(StepTemplateId(new_id()), draft, Utc::now());
        state.templates.push(template.clone());
        Ok(template)
    }

    async fn revise_template(
        &self,
        id: &StepTemplateId,
        draft: StepTemplateDraft,
    ) -> Result<StepTemplate, StoreError> {
        let mut state = self.lock()?;
        if has_active_step(&state, &draft, Some(id)) {
            return Err(StoreError::DuplicateStepOrder {
                template_name: draft.template_name,
                step_order: draft.step_order,
            });
        }

        let now = Utc::now();
        let previous = state
            .templates
            .iter_mut()
            .find(|row| &row.id == id && row.active)
            .ok_or_else(|| StoreError::NotFound(format!("step template `{}`", id.0)))?;
        previous.active = false;
        previous.updated_at = now;

        let replacement = StepTemplate::from_draft(StepTemplateId(new_id()), draft, now);
        state.templates.push(replacement.clone());
        Ok(replacement)
    }

    async fn deactivate_template(&self, id: &StepTemplateId) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let row = state
            .templates
            .iter_mut()
            .find(|row| row.active && &row.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("step template `{}`", id.0)))?;
        row.active = false;
        row.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl StepInstanceStore for InMemoryWorkflowStore {
    async fn insert_instances(&self, instances: Vec<StepInstance>) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let claimed = instances.iter().find(|instance| {
            state.instances.iter().any(|row| row.active && row.order_id == instance.order_id)
        });
        if let Some(instance) = claimed {
            return Err(StoreError::StepsAlreadyInstantiated {
                order_id: instance.order_id.0.clone(),
            });
        }
        state.instances.extend(instances);
        Ok(())
    }

    async fn list_instances(&self, order_id: &OrderId) -> Result<Vec<StepInstance>, StoreError> {
        let state = self.lock()?;
        let mut rows = state
            .instances
            .iter()
            .filter(|row| row.active && &row.order_id == order_id)
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|left, right| {
            left.step_order.cmp(&right.step_order).then_with(|| left.id.cmp(&right.id))
        });
        Ok(rows)
    }

    async fn find_instance(
        &self,
        id: &StepInstanceId,
    ) -> Result<Option<StepInstance>, StoreError> {
        let state = self.lock()?;
        Ok(state.instances.iter().find(|row| &row.id == id).cloned())
    }

    async fn transition_instance(
        &self,
        id: &StepInstanceId,
        decision: StepDecision,
        acting_user_id: &UserId,
        note: &StepNote,
        at: DateTime<Utc>,
    ) -> Result<Option<StepInstance>, StoreError> {
        let mut state = self.lock()?;
        let Some(row) = state.instances.iter_mut().find(|row| &row.id == id && row.is_pending())
        else {
            return Ok(None);
        };

        row.apply_decision(decision, acting_user_id, note, at)
            .map_err(|error| StoreError::Decode(error.to_string()))?;
        Ok(Some(row.clone()))
    }
}

#[async_trait]
impl UserDirectory for InMemoryWorkflowStore {
    async fn users_with_role(
        &self,
        role: Role,
        limit: usize,
    ) -> Result<Vec<DirectoryUser>, StoreError> {
        let state = self.lock()?;
        Ok(state.users.iter().filter(|user| user.role == role).take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::InMemoryWorkflowStore;
    use crate::domain::authority::AuthorityDraft;
    use crate::domain::order::{CompanyId, OrderId};
    use crate::domain::policy::{ApprovalMode, PolicyDraft};
    use crate::domain::role::Role;
    use crate::domain::step::{StepInstance, StepInstanceId};
    use crate::domain::template::StepTemplateDraft;
    use crate::workflow::store::{
        AuthorityRegistry, PolicyStore, StepInstanceStore, StoreError, TemplateCatalog,
    };

    #[tokio::test]
    async fn second_active_authority_for_role_is_rejected() {
        let store = InMemoryWorkflowStore::default();
        let first = store
            .create_authority(AuthorityDraft::new(Role::Executive, Decimal::from(500_000_000)))
            .await
            .expect("first authority");

        let error = store
            .create_authority(AuthorityDraft::new(Role::Executive, Decimal::from(1)))
            .await
            .expect_err("duplicate active authority");
        assert_eq!(error, StoreError::DuplicateAuthority { role: Role::Executive });

        store.deactivate_authority(&first.id).await.expect("deactivate");
        store
            .create_authority(AuthorityDraft::new(Role::Executive, Decimal::from(1)))
            .await
            .expect("role is free again after deactivation");
    }

    #[tokio::test]
    async fn policy_upsert_supersedes_in_place() {
        let store = InMemoryWorkflowStore::default();
        let company = CompanyId("c-1".to_owned());

        let first =
            store.upsert_policy(PolicyDraft::staged(company.clone())).await.expect("insert");
        let second = store
            .upsert_policy(PolicyDraft::direct(company.clone(), vec![Role::Executive]))
            .await
            .expect("update");

        assert_eq!(first.id, second.id);
        assert_eq!(second.approval_mode, ApprovalMode::Direct);
        let active = store.find_active_policy(&company).await.expect("find").expect("active");
        assert_eq!(active, second);
    }

    #[tokio::test]
    async fn revise_keeps_history_and_swaps_active_row() {
        let store = InMemoryWorkflowStore::default();
        let company = CompanyId("c-1".to_owned());
        let draft = StepTemplateDraft::new(company.clone(), "standard", 1, Role::ProjectManager);
        let original = store.create_template(draft).await.expect("create");

        let revised = store
            .revise_template(
                &original.id,
                StepTemplateDraft::new(company.clone(), "standard", 1, Role::HqManagement),
            )
            .await
            .expect("revise");

        let history = store.find_template(&original.id).await.expect("find").expect("kept");
        assert!(!history.active);
        assert_eq!(history.required_role, Role::ProjectManager);

        let active = store.list_templates(&company, Some("standard")).await.expect("list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, revised.id);
    }

    #[tokio::test]
    async fn duplicate_step_order_within_template_is_rejected() {
        let store = InMemoryWorkflowStore::default();
        let company = CompanyId("c-1".to_owned());
        store
            .create_template(StepTemplateDraft::new(
                company.clone(),
                "standard",
                1,
                Role::Executive,
            ))
            .await
            .expect("create");

        let error = store
            .create_template(StepTemplateDraft::new(company, "standard", 1, Role::Admin))
            .await
            .expect_err("duplicate");
        assert!(matches!(error, StoreError::DuplicateStepOrder { step_order: 1, .. }));
    }

    #[tokio::test]
    async fn retiring_a_retired_step_is_not_found() {
        let store = InMemoryWorkflowStore::default();
        let company = CompanyId("c-1".to_owned());
        let step = store
            .create_template(StepTemplateDraft::new(company, "standard", 1, Role::Executive))
            .await
            .expect("create");
        store.deactivate_template(&step.id).await.expect("retire");
        let retired = store.find_template(&step.id).await.expect("find").expect("kept");

        let error = store.deactivate_template(&step.id).await.expect_err("already retired");
        assert!(matches!(error, StoreError::NotFound(_)));
        let unchanged = store.find_template(&step.id).await.expect("find").expect("kept");
        assert_eq!(unchanged.updated_at, retired.updated_at);
    }

    #[tokio::test]
    async fn second_step_set_for_an_order_is_refused_whole() {
        let store = InMemoryWorkflowStore::default();
        let company = CompanyId("c-1".to_owned());
        let template = store
            .create_template(StepTemplateDraft::new(company, "standard", 1, Role::Executive))
            .await
            .expect("create");
        let order = OrderId("PO-1".to_owned());
        let step_set = |suffix: &str| {
            vec![StepInstance::pending_from_template(
                StepInstanceId(format!("si-{suffix}")),
                order.clone(),
                &template,
                Utc::now(),
            )]
        };

        store.insert_instances(step_set("a")).await.expect("first set");
        let error = store.insert_instances(step_set("b")).await.expect_err("second set");
        assert_eq!(error, StoreError::StepsAlreadyInstantiated { order_id: "PO-1".to_owned() });

        let listed = store.list_instances(&order).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, StepInstanceId("si-a".to_owned()));
    }
}
