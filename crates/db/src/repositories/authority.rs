use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use poflow_core::domain::authority::{ApprovalAuthority, AuthorityDraft, AuthorityId};
use poflow_core::domain::role::Role;
use poflow_core::workflow::store::{AuthorityRegistry, StoreError};

use super::{
    column, decimal, is_unique_violation, optional_decimal, role, timestamp, RepositoryError,
    SqlWorkflowStore,
};

const AUTHORITY_COLUMNS: &str = "id, role, max_amount, description, active, can_direct_approve,
     direct_approve_limit, created_at, updated_at";

fn row_to_authority(row: &SqliteRow) -> Result<ApprovalAuthority, RepositoryError> {
    Ok(ApprovalAuthority {
        id: AuthorityId(column(row, "id")?),
        role: role(row, "role")?,
        max_amount: decimal(row, "max_amount")?,
        description: column(row, "description")?,
        active: column(row, "active")?,
        can_direct_approve: column(row, "can_direct_approve")?,
        direct_approve_limit: optional_decimal(row, "direct_approve_limit")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

impl SqlWorkflowStore {
    async fn fetch_authority(
        &self,
        id: &AuthorityId,
    ) -> Result<Option<ApprovalAuthority>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {AUTHORITY_COLUMNS} FROM approval_authority WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(row_to_authority).transpose()
    }
}

#[async_trait]
impl AuthorityRegistry for SqlWorkflowStore {
    async fn find_active_authority(
        &self,
        role: Role,
    ) -> Result<Option<ApprovalAuthority>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {AUTHORITY_COLUMNS} FROM approval_authority
             WHERE role = ? AND active = 1
             LIMIT 1"
        ))
        .bind(role.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_authority).transpose()?)
    }

    async fn list_authorities(&self) -> Result<Vec<ApprovalAuthority>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {AUTHORITY_COLUMNS} FROM approval_authority ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        let mut authorities = rows.iter().map(row_to_authority).collect::<Result<Vec<_>, _>>()?;
        authorities.sort_by_key(|row| row.role);
        Ok(authorities)
    }

    async fn create_authority(
        &self,
        draft: AuthorityDraft,
    ) -> Result<ApprovalAuthority, StoreError> {
        let id = AuthorityId(Uuid::new_v4().to_string());
        let authority = ApprovalAuthority::from_draft(id, draft, Utc::now());

        let result = sqlx::query(
            "INSERT INTO approval_authority
                (id, role, max_amount, description, active, can_direct_approve,
                 direct_approve_limit, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&authority.id.0)
        .bind(authority.role.as_str())
        .bind(authority.max_amount.to_string())
        .bind(&authority.description)
        .bind(authority.active)
        .bind(authority.can_direct_approve)
        .bind(authority.direct_approve_limit.map(|limit| limit.to_string()))
        .bind(authority.created_at.to_rfc3339())
        .bind(authority.updated_at.to_rfc3339())
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(authority),
            Err(error) if is_unique_violation(&error) => {
                Err(StoreError::DuplicateAuthority { role: authority.role })
            }
            Err(error) => Err(RepositoryError::from(error).into()),
        }
    }

    async fn update_authority(
        &self,
        id: &AuthorityId,
        draft: AuthorityDraft,
    ) -> Result<ApprovalAuthority, StoreError> {
        let role = draft.role;
        let result = sqlx::query(
            "UPDATE approval_authority
             SET role = ?, max_amount = ?, description = ?, active = ?, can_direct_approve = ?,
                 direct_approve_limit = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(role.as_str())
        .bind(draft.max_amount.to_string())
        .bind(&draft.description)
        .bind(draft.active)
        .bind(draft.can_direct_approve)
        .bind(draft.direct_approve_limit.map(|limit| limit.to_string()))
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(self.pool())
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                Err(StoreError::NotFound(format!("approval authority `{}`", id.0)))
            }
            Ok(_) => self
                .fetch_authority(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("approval authority `{}`", id.0))),
            Err(error) if is_unique_violation(&error) => {
                Err(StoreError::DuplicateAuthority { role })
            }
            Err(error) => Err(RepositoryError::from(error).into()),
        }
    }

    async fn deactivate_authority(&self, id: &AuthorityId) -> Result<(), StoreError> {
        let done = sqlx::query(
            "UPDATE approval_authority SET active = 0, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("approval authority `{}`", id.0)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use poflow_core::domain::authority::{AuthorityDraft, AuthorityId};
    use poflow_core::domain::role::Role;
    use poflow_core::workflow::store::{AuthorityRegistry, StoreError};

    use crate::repositories::test_support::migrated_store;

    #[tokio::test]
    async fn active_authority_is_unique_per_role() {
        let store = migrated_store().await;
        let mut draft = AuthorityDraft::new(Role::HqManagement, Decimal::new(10_000_000_050, 2));
        draft.description = Some("head office".to_owned());
        let created = store.create_authority(draft).await.expect("create");

        let found = store
            .find_active_authority(Role::HqManagement)
            .await
            .expect("find")
            .expect("active authority");
        assert_eq!(found, created);
        assert_eq!(found.max_amount, Decimal::new(10_000_000_050, 2));

        let error = store
            .create_authority(AuthorityDraft::new(Role::HqManagement, Decimal::ONE))
            .await
            .expect_err("duplicate");
        assert_eq!(error, StoreError::DuplicateAuthority { role: Role::HqManagement });
    }

    #[tokio::test]
    async fn update_onto_occupied_role_is_rejected_and_deactivate_frees_it() {
        let store = migrated_store().await;
        let pm = store
            .create_authority(AuthorityDraft::new(Role::ProjectManager, Decimal::from(100)))
            .await
            .expect("pm");
        let exec = store
            .create_authority(AuthorityDraft::new(Role::Executive, Decimal::from(1_000)))
            .await
            .expect("exec");

        let error = store
            .update_authority(&exec.id, AuthorityDraft::new(Role::ProjectManager, Decimal::TEN))
            .await
            .expect_err("occupied role");
        assert_eq!(error, StoreError::DuplicateAuthority { role: Role::ProjectManager });

        store.deactivate_authority(&pm.id).await.expect("deactivate");
        let moved = store
            .update_authority(&exec.id, AuthorityDraft::new(Role::ProjectManager, Decimal::TEN))
            .await
            .expect("role free");
        assert_eq!(moved.role, Role::ProjectManager);
        assert_eq!(moved.created_at, exec.created_at);
        assert_eq!(store.find_active_authority(Role::Executive).await.expect("find"), None);

        let listed = store.list_authorities().await.expect("list");
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn unknown_authority_is_not_found() {
        let store = migrated_store().await;
        let error = store
            .deactivate_authority(&AuthorityId("nope".to_owned()))
            .await
            .expect_err("missing");
        assert!(matches!(error, StoreError::NotFound(_)));
    }
}
