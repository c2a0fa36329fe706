use crate::connection::DbPool;
use crate::repositories::RepositoryError;

pub const DEMO_COMPANY_ID: &str = "company-demo";

const DEMO_USER_IDS: &[&str] =
    &["u-demo-field", "u-demo-pm", "u-demo-hq", "u-demo-exec", "u-demo-admin"];

const DEMO_AUTHORITIES: &[(&str, &str)] = &[
    ("auth-demo-pm", "project_manager"),
    ("auth-demo-hq", "hq_management"),
    ("auth-demo-exec", "executive"),
];

/// `(id, step_order, required_role)` of the demo `standard` template.
const DEMO_TEMPLATE_STEPS: &[(&str, i64, &str)] =
    &[("tmpl-demo-pm", 1, "project_manager"), ("tmpl-demo-hq", 2, "hq_management")];

/// Deterministic demo workflow: a staged policy for `company-demo` whose two-step
/// template sends orders up to 10,000,000 to a project manager and larger orders to
/// head office.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    /// Loads the dataset. Rows that already exist are left untouched.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(Self::SQL).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(SeedResult {
            company_id: DEMO_COMPANY_ID,
            users: DEMO_USER_IDS.len(),
            authorities: DEMO_AUTHORITIES.len(),
            template_steps: DEMO_TEMPLATE_STEPS.len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for user_id in DEMO_USER_IDS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM app_user WHERE id = ?1 AND active = 1)",
            )
            .bind(user_id)
            .fetch_one(pool)
            .await?;
            checks.push((*user_id, present == 1));
        }

        for (authority_id, role) in DEMO_AUTHORITIES {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM approval_authority WHERE id = ?1 AND role = ?2 AND active = 1
                 )",
            )
            .bind(authority_id)
            .bind(role)
            .fetch_one(pool)
            .await?;
            checks.push((*authority_id, present == 1));
        }

        let policy: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM workflow_policy
                WHERE company_id = ?1 AND approval_mode = 'staged' AND active = 1
             )",
        )
        .bind(DEMO_COMPANY_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("policy-demo", policy == 1));

        for (template_id, step_order, role) in DEMO_TEMPLATE_STEPS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM approval_step_template
                    WHERE id = ?1 AND company_id = ?2 AND step_order = ?3
                      AND required_role = ?4 AND active = 1
                 )",
            )
            .bind(template_id)
            .bind(DEMO_COMPANY_ID)
            .bind(step_order)
            .bind(role)
            .fetch_one(pool)
            .await?;
            checks.push((*template_id, present == 1));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub company_id: &'static str,
    pub users: usize,
    pub authorities: usize,
    pub template_steps: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use poflow_core::domain::order::CompanyId;
    use poflow_core::domain::role::Role;
    use poflow_core::workflow::store::{AuthorityRegistry, TemplateCatalog};

    use super::{DemoSeedDataset, DEMO_COMPANY_ID};
    use crate::repositories::SqlWorkflowStore;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_targets_demo_company() {
        assert!(DemoSeedDataset::SQL.contains(DEMO_COMPANY_ID));
    }

    #[tokio::test]
    async fn load_is_idempotent_and_verifies() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let before = DemoSeedDataset::verify(&pool).await.expect("verify empty");
        assert!(!before.all_present);

        DemoSeedDataset::load(&pool).await.expect("first load");
        let seeded = DemoSeedDataset::load(&pool).await.expect("second load");
        assert_eq!(seeded.template_steps, 2);

        let verification = DemoSeedDataset::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "failed checks: {:?}", verification.checks);

        let store = SqlWorkflowStore::new(pool);
        let steps = store
            .matching_steps(&CompanyId(DEMO_COMPANY_ID.to_owned()), Decimal::from(5_000_000))
            .await
            .expect("match");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].required_role, Role::ProjectManager);

        let executive =
            store.find_active_authority(Role::Executive).await.expect("find").expect("seeded");
        assert!(executive.can_direct_approve);
    }
}
