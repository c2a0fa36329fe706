use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};

use poflow_core::domain::order::{OrderId, UserId};
use poflow_core::domain::step::{StepDecision, StepInstance, StepInstanceId, StepNote, StepStatus};
use poflow_core::domain::template::StepTemplateId;
use poflow_core::workflow::store::{StepInstanceStore, StoreError};

use super::{
    column, optional_timestamp, role, step_order, timestamp, RepositoryError, SqlWorkflowStore,
};

const INSTANCE_COLUMNS: &str = "id, order_id, template_id, step_order, required_role,
     assigned_user_id, status, approved_by, approved_at, rejection_reason, comments, active,
     created_at, updated_at";

fn row_to_instance(row: &SqliteRow) -> Result<StepInstance, RepositoryError> {
    let status: String = column(row, "status")?;
    let template_id: Option<String> = column(row, "template_id")?;
    let assigned_user_id: Option<String> = column(row, "assigned_user_id")?;
    let approved_by: Option<String> = column(row, "approved_by")?;

    Ok(StepInstance {
        id: StepInstanceId(column(row, "id")?),
        order_id: OrderId(column(row, "order_id")?),
        template_id: template_id.map(StepTemplateId),
        step_order: step_order(row)?,
        required_role: role(row, "required_role")?,
        assigned_user_id: assigned_user_id.map(UserId),
        status: status
            .parse::<StepStatus>()
            .map_err(|error| RepositoryError::Decode(format!("status: {error}")))?,
        approved_by: approved_by.map(UserId),
        approved_at: optional_timestamp(row, "approved_at")?,
        rejection_reason: column(row, "rejection_reason")?,
        comments: column(row, "comments")?,
        active: column(row, "active")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

impl SqlWorkflowStore {
    async fn fetch_instance(
        &self,
        id: &StepInstanceId,
    ) -> Result<Option<StepInstance>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_step_instance WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(row_to_instance).transpose()
    }

    /// Inserts the step set unless one of its orders already has active instances.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock before the existence check, so two
    /// writers for one order serialize and the second sees the first one's rows.
    /// Returns the already-claimed order id when nothing was written.
    async fn insert_unclaimed(
        &self,
        instances: &[StepInstance],
    ) -> Result<Option<String>, sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = insert_if_unclaimed(&mut *conn, instances).await;
        let finish = if matches!(result, Ok(None)) { "COMMIT" } else { "ROLLBACK" };
        if let Err(error) = sqlx::query(finish).execute(&mut *conn).await {
            // A connection with an open transaction must not go back to the pool.
            drop(conn.detach());
            return result.and(Err(error));
        }
        result
    }
}

async fn insert_if_unclaimed(
    conn: &mut SqliteConnection,
    instances: &[StepInstance],
) -> Result<Option<String>, sqlx::Error> {
    let mut order_ids = instances.iter().map(|instance| &instance.order_id.0).collect::<Vec<_>>();
    order_ids.sort();
    order_ids.dedup();

    for order_id in order_ids {
        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM approval_step_instance WHERE order_id = ? AND active = 1",
        )
        .bind(order_id)
        .fetch_one(&mut *conn)
        .await?;
        if active > 0 {
            return Ok(Some(order_id.clone()));
        }
    }

    for instance in instances {
        sqlx::query(
            "INSERT INTO approval_step_instance
                (id, order_id, template_id, step_order, required_role, assigned_user_id,
                 status, approved_by, approved_at, rejection_reason, comments, active,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&instance.id.0)
        .bind(&instance.order_id.0)
        .bind(instance.template_id.as_ref().map(|id| id.0.clone()))
        .bind(i64::from(instance.step_order))
        .bind(instance.required_role.as_str())
        .bind(instance.assigned_user_id.as_ref().map(|id| id.0.clone()))
        .bind(instance.status.as_str())
        .bind(instance.approved_by.as_ref().map(|id| id.0.clone()))
        .bind(instance.approved_at.map(|at| at.to_rfc3339()))
        .bind(&instance.rejection_reason)
        .bind(&instance.comments)
        .bind(instance.active)
        .bind(instance.created_at.to_rfc3339())
        .bind(instance.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;
    }
    Ok(None)
}

#[async_trait]
impl StepInstanceStore for SqlWorkflowStore {
    async fn insert_instances(&self, instances: Vec<StepInstance>) -> Result<(), StoreError> {
        match self.insert_unclaimed(&instances).await.map_err(RepositoryError::from)? {
            None => Ok(()),
            Some(order_id) => Err(StoreError::StepsAlreadyInstantiated { order_id }),
        }
    }

    async fn list_instances(&self, order_id: &OrderId) -> Result<Vec<StepInstance>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_step_instance
             WHERE order_id = ? AND active = 1
             ORDER BY step_order ASC, id ASC"
        ))
        .bind(&order_id.0)
        .fetch_all(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_instance).collect::<Result<Vec<_>, _>>()?)
    }

    async fn find_instance(
        &self,
        id: &StepInstanceId,
    ) -> Result<Option<StepInstance>, StoreError> {
        Ok(self.fetch_instance(id).await?)
    }

    async fn transition_instance(
        &self,
        id: &StepInstanceId,
        decision: StepDecision,
        acting_user_id: &UserId,
        note: &StepNote,
        at: DateTime<Utc>,
    ) -> Result<Option<StepInstance>, StoreError> {
        let done = sqlx::query(
            "UPDATE approval_step_instance
             SET status = ?, approved_by = ?, approved_at = ?,
                 comments = COALESCE(?, comments),
                 rejection_reason = COALESCE(?, rejection_reason),
                 updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(decision.as_str())
        .bind(&acting_user_id.0)
        .bind(at.to_rfc3339())
        .bind(&note.comments)
        .bind(&note.rejection_reason)
        .bind(at.to_rfc3339())
        .bind(&id.0)
        .execute(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        if done.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(self.fetch_instance(id).await?)
    }
}
