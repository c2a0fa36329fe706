use poflow_core::config::LoadOptions;
use poflow_db::{migrations, DemoSeedDataset, SeedResult};
use serde::Serialize;

use crate::commands::{execute, open_store, CommandResult, Failure};

#[derive(Debug, Serialize)]
struct SeedOutput {
    company_id: &'static str,
    users: usize,
    authorities: usize,
    template_steps: usize,
}

impl From<SeedResult> for SeedOutput {
    fn from(value: SeedResult) -> Self {
        Self {
            company_id: value.company_id,
            users: value.users,
            authorities: value.authorities,
            template_steps: value.template_steps,
        }
    }
}

pub fn run(options: &LoadOptions) -> CommandResult {
    execute("seed", options, |config| async move {
        let store = open_store(&config).await?;
        let pool = store.pool();

        migrations::run_pending(pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = DemoSeedDataset::load(pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        pool.close().await;

        if !verification.all_present {
            return Err(("seed_verification", verification_message(&verification.checks), 6u8));
        }

        let output = SeedOutput::from(seeded);
        let message = format!(
            "demo workflow seeded for `{}`: {} users, {} authorities, {} template steps",
            output.company_id, output.users, output.authorities, output.template_steps
        );
        Ok::<_, Failure>((message, Some(output)))
    })
}

fn verification_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks = [("u-demo-pm", true), ("auth-demo-hq", false), ("tmpl-demo-hq", false)];
        assert_eq!(
            verification_message(&checks),
            "seed verification failed for checks: auth-demo-hq, tmpl-demo-hq"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        let checks = [("policy-demo", true)];
        assert_eq!(verification_message(&checks), "some seed data failed to load");
    }
}
