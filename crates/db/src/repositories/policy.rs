use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use poflow_core::domain::order::{CompanyId, UserId};
use poflow_core::domain::policy::{ApprovalMode, PolicyDraft, PolicyId, WorkflowPolicy};
use poflow_core::domain::role::Role;
use poflow_core::workflow::store::{PolicyStore, StoreError};

use super::{column, timestamp, RepositoryError, SqlWorkflowStore};

fn row_to_policy(row: &SqliteRow) -> Result<WorkflowPolicy, RepositoryError> {
    let mode: String = column(row, "approval_mode")?;
    let roles: String = column(row, "direct_approval_roles")?;
    let created_by: Option<String> = column(row, "created_by")?;

    Ok(WorkflowPolicy {
        id: PolicyId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        approval_mode: ApprovalMode::from_str(&mode)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        direct_approval_roles: serde_json::from_str::<Vec<Role>>(&roles).map_err(|error| {
            RepositoryError::Decode(format!("direct_approval_roles `{roles}`: {error}"))
        })?,
        require_all_stages: column(row, "require_all_stages")?,
        skip_lower_stages: column(row, "skip_lower_stages")?,
        active: column(row, "active")?,
        created_by: created_by.map(UserId),
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn encode_roles(roles: &[Role]) -> Result<String, RepositoryError> {
    serde_json::to_string(roles).map_err(|error| RepositoryError::Decode(error.to_string()))
}

impl SqlWorkflowStore {
    async fn upsert_policy_row(
        &self,
        draft: PolicyDraft,
    ) -> Result<WorkflowPolicy, RepositoryError> {
        let mut tx = self.pool().begin().await?;
        let now = Utc::now();

        let existing = sqlx::query(
            "SELECT id, company_id, approval_mode, direct_approval_roles, require_all_stages,
                    skip_lower_stages, active, created_by, created_at, updated_at
             FROM workflow_policy
             WHERE company_id = ? AND active = 1",
        )
        .bind(&draft.company_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let policy = match existing.as_ref().map(row_to_policy).transpose()? {
            Some(current) => {
                let mut policy = draft.into_policy(current.id, current.created_at, now);
                if policy.created_by.is_none() {
                    policy.created_by = current.created_by;
                }
                sqlx::query(
                    "UPDATE workflow_policy
                     SET approval_mode = ?, direct_approval_roles = ?, require_all_stages = ?,
                         skip_lower_stages = ?, created_by = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(policy.approval_mode.as_str())
                .bind(encode_roles(&policy.direct_approval_roles)?)
                .bind(policy.require_all_stages)
                .bind(policy.skip_lower_stages)
                .bind(policy.created_by.as_ref().map(|user| user.0.clone()))
                .bind(policy.updated_at.to_rfc3339())
                .bind(&policy.id.0)
                .execute(&mut *tx)
                .await?;
                policy
            }
            None => {
                let policy = draft.into_policy(PolicyId(Uuid::new_v4().to_string()), now, now);
                sqlx::query(
                    "INSERT INTO workflow_policy
                        (id, company_id, approval_mode, direct_approval_roles, require_all_stages,
                         skip_lower_stages, active, created_by, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&policy.id.0)
                .bind(&policy.company_id.0)
                .bind(policy.approval_mode.as_str())
                .bind(encode_roles(&policy.direct_approval_roles)?)
                .bind(policy.require_all_stages)
                .bind(policy.skip_lower_stages)
                .bind(policy.active)
                .bind(policy.created_by.as_ref().map(|user| user.0.clone()))
                .bind(policy.created_at.to_rfc3339())
                .bind(policy.updated_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
                policy
            }
        };

        tx.commit().await?;
        Ok(policy)
    }
}

#[async_trait]
impl PolicyStore for SqlWorkflowStore {
    async fn find_active_policy(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<WorkflowPolicy>, StoreError> {
        let row = sqlx::query(
            "SELECT id, company_id, approval_mode, direct_approval_roles, require_all_stages,
                    skip_lower_stages, active, created_by, created_at, updated_at
             FROM workflow_policy
             WHERE company_id = ? AND active = 1
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(&company_id.0)
        .fetch_optional(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_policy).transpose()?)
    }

    async fn upsert_policy(&self, draft: PolicyDraft) -> Result<WorkflowPolicy, StoreError> {
        Ok(self.upsert_policy_row(draft).await?)
    }
}

#[cfg(test)]
mod tests {
    use poflow_core::domain::order::{CompanyId, UserId};
    use poflow_core::domain::policy::{ApprovalMode, PolicyDraft};
    use poflow_core::domain::role::Role;
    use poflow_core::workflow::store::PolicyStore;

    use crate::repositories::test_support::migrated_store;

    #[tokio::test]
    async fn missing_policy_is_none() {
        let store = migrated_store().await;
        let policy =
            store.find_active_policy(&CompanyId("nobody".to_owned())).await.expect("query");
        assert_eq!(policy, None);
    }

    #[tokio::test]
    async fn upsert_replaces_active_policy_in_place() {
        let store = migrated_store().await;
        let company = CompanyId("company-a".to_owned());
        let mut staged = PolicyDraft::staged(company.clone());
        staged.created_by = Some(UserId("u-admin".to_owned()));
        let first = store.upsert_policy(staged).await.expect("insert");
        assert!(first.require_all_stages);
        assert!(!first.skip_lower_stages);

        let second = store
            .upsert_policy(PolicyDraft::direct(
                company.clone(),
                vec![Role::Executive, Role::Admin, Role::Executive],
            ))
            .await
            .expect("update");
        assert_eq!(second.id, first.id);
        assert_eq!(second.created_by, Some(UserId("u-admin".to_owned())));

        let active = store.find_active_policy(&company).await.expect("find").expect("policy");
        assert_eq!(active.approval_mode, ApprovalMode::Direct);
        assert_eq!(active.direct_approval_roles, vec![Role::Executive, Role::Admin]);
        assert_eq!(active.created_at, first.created_at);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workflow_policy")
            .fetch_one(store.pool())
            .await
            .expect("count");
        assert_eq!(rows, 1);
    }
}
