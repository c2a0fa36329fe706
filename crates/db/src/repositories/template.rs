use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use poflow_core::domain::order::CompanyId;
use poflow_core::domain::template::{StepTemplate, StepTemplateDraft, StepTemplateId};
use poflow_core::workflow::store::{StoreError, TemplateCatalog};

use super::{
    column, decimal, is_unique_violation, optional_decimal, role, step_order, timestamp,
    RepositoryError, SqlWorkflowStore,
};

const TEMPLATE_COLUMNS: &str = "id, company_id, template_name, step_order, required_role,
     min_amount, max_amount, is_optional, can_skip, description, active, created_at, updated_at";

fn row_to_template(row: &SqliteRow) -> Result<StepTemplate, RepositoryError> {
    Ok(StepTemplate {
        id: StepTemplateId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        template_name: column(row, "template_name")?,
        step_order: step_order(row)?,
        required_role: role(row, "required_role")?,
        min_amount: decimal(row, "min_amount")?,
        max_amount: optional_decimal(row, "max_amount")?,
        is_optional: column(row, "is_optional")?,
        can_skip: column(row, "can_skip")?,
        description: column(row, "description")?,
        active: column(row, "active")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn duplicate(template: &StepTemplate) -> StoreError {
    StoreError::DuplicateStepOrder {
        template_name: template.template_name.clone(),
        step_order: template.step_order,
    }
}

async fn insert_template<'e, E>(executor: E, template: &StepTemplate) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO approval_step_template
            (id, company_id, template_name, step_order, required_role, min_amount, max_amount,
             is_optional, can_skip, description, active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&template.id.0)
    .bind(&template.company_id.0)
    .bind(&template.template_name)
    .bind(i64::from(template.step_order))
    .bind(template.required_role.as_str())
    .bind(template.min_amount.to_string())
    .bind(template.max_amount.map(|max| max.to_string()))
    .bind(template.is_optional)
    .bind(template.can_skip)
    .bind(&template.description)
    .bind(template.active)
    .bind(template.created_at.to_rfc3339())
    .bind(template.updated_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

impl SqlWorkflowStore {
    async fn active_templates(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<StepTemplate>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM approval_step_template
             WHERE company_id = ? AND active = 1
             ORDER BY template_name ASC, step_order ASC, id ASC"
        ))
        .bind(&company_id.0)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_template).collect()
    }

    async fn replace_template(
        &self,
        id: &StepTemplateId,
        replacement: &StepTemplate,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        let retired = sqlx::query(
            "UPDATE approval_step_template SET active = 0, updated_at = ?
             WHERE id = ? AND active = 1",
        )
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&mut *tx)
        .await?;

        if retired.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_template(&mut *tx, replacement).await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl TemplateCatalog for SqlWorkflowStore {
    async fn matching_steps(
        &self,
        company_id: &CompanyId,
        amount: Decimal,
    ) -> Result<Vec<StepTemplate>, StoreError> {
        // Amounts are stored as TEXT, so range filtering happens on decoded decimals.
        let mut steps = self
            .active_templates(company_id)
            .await?
            .into_iter()
            .filter(|step| step.covers(amount))
            .collect::<Vec<_>>();
        steps.sort_by(|left, right| {
            left.step_order.cmp(&right.step_order).then_with(|| left.id.cmp(&right.id))
        });
        Ok(steps)
    }

    async fn list_templates(
        &self,
        company_id: &CompanyId,
        template_name: Option<&str>,
    ) -> Result<Vec<StepTemplate>, StoreError> {
        let steps = self.active_templates(company_id).await?;
        Ok(match template_name {
            Some(name) => steps.into_iter().filter(|step| step.template_name == name).collect(),
            None => steps,
        })
    }

    async fn find_template(
        &self,
        id: &StepTemplateId,
    ) -> Result<Option<StepTemplate>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM approval_step_template WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_template).transpose()?)
    }

    async fn create_template(&self, draft: StepTemplateDraft) -> Result<StepTemplate, StoreError> {
        let id = StepTemplateId(Uuid::new_v4().to_string());
        let template = StepTemplate::from_draft(id, draft, Utc::now());

        match insert_template(self.pool(), &template).await {
            Ok(()) => Ok(template),
            Err(error) if is_unique_violation(&error) => Err(duplicate(&template)),
            Err(error) => Err(RepositoryError::from(error).into()),
        }
    }

    async fn revise_template(
        &self,
        id: &StepTemplateId,
        draft: StepTemplateDraft,
    ) -> Result<StepTemplate, StoreError> {
        let now = Utc::now();
        let replacement =
            StepTemplate::from_draft(StepTemplateId(Uuid::new_v4().to_string()), draft, now);

        match self.replace_template(id, &replacement, now).await {
            Ok(true) => Ok(replacement),
            Ok(false) => Err(StoreError::NotFound(format!("step template `{}`", id.0))),
            Err(error) if is_unique_violation(&error) => Err(duplicate(&replacement)),
            Err(error) => Err(RepositoryError::from(error).into()),
        }
    }

    async fn deactivate_template(&self, id: &StepTemplateId) -> Result<(), StoreError> {
        let done = sqlx::query(
            "UPDATE approval_step_template SET active = 0, updated_at = ?
             WHERE id = ? AND active = 1",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("step template `{}`", id.0)));
        }
        Ok(())
    }
}
