use async_trait::async_trait;

use poflow_core::domain::directory::DirectoryUser;
use poflow_core::domain::order::UserId;
use poflow_core::domain::role::Role;
use poflow_core::workflow::store::{StoreError, UserDirectory};

use super::{column, role, RepositoryError, SqlWorkflowStore};

#[async_trait]
impl UserDirectory for SqlWorkflowStore {
    async fn users_with_role(
        &self,
        role_filter: Role,
        limit: usize,
    ) -> Result<Vec<DirectoryUser>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT id, name, role FROM app_user
             WHERE role = ? AND active = 1
             ORDER BY name ASC, id ASC
             LIMIT ?",
        )
        .bind(role_filter.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        let users = rows
            .iter()
            .map(|row| {
                Ok(DirectoryUser {
                    id: UserId(column(row, "id")?),
                    name: column(row, "name")?,
                    role: role(row, "role")?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use poflow_core::domain::role::Role;
    use poflow_core::workflow::store::UserDirectory;

    use crate::repositories::test_support::migrated_store;

    #[tokio::test]
    async fn lists_active_users_for_role_up_to_limit() {
        let store = migrated_store().await;
        for (id, name, role, active) in [
            ("u-1", "Alice", "executive", 1),
            ("u-2", "Bob", "executive", 1),
            ("u-3", "Carol", "executive", 0),
            ("u-4", "Dan", "admin", 1),
        ] {
            sqlx::query(
                "INSERT INTO app_user (id, name, role, active, created_at)
                 VALUES (?, ?, ?, ?, '2026-01-01T00:00:00Z')",
            )
            .bind(id)
            .bind(name)
            .bind(role)
            .bind(active)
            .execute(store.pool())
            .await
            .expect("insert user");
        }

        let executives = store.users_with_role(Role::Executive, 10).await.expect("query");
        assert_eq!(
            executives.iter().map(|user| user.id.0.as_str()).collect::<Vec<_>>(),
            vec!["u-1", "u-2"]
        );

        let limited = store.users_with_role(Role::Executive, 1).await.expect("query");
        assert_eq!(limited.len(), 1);
        assert!(store.users_with_role(Role::FieldWorker, 10).await.expect("query").is_empty());
    }
}
