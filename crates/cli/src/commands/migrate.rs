use poflow_core::config::LoadOptions;
use poflow_db::migrations;
use serde_json::Value;

use crate::commands::{execute, open_store, CommandResult, Failure};

pub fn run(options: &LoadOptions) -> CommandResult {
    execute("migrate", options, |config| async move {
        let store = open_store(&config).await?;
        migrations::run_pending(store.pool())
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        store.pool().close().await;
        Ok::<_, Failure>(("applied pending migrations".to_string(), None::<Value>))
    })
}
