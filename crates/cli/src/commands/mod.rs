pub mod advance;
pub mod config;
pub mod doctor;
pub mod instantiate;
pub mod migrate;
pub mod progress;
pub mod route;
pub mod seed;

use std::future::Future;
use std::sync::Arc;

use poflow_core::config::{AppConfig, LoadOptions};
use poflow_core::{ApplicationError, InterfaceError};
use poflow_db::{connect_with_config, SqlWorkflowStore};
use serde::Serialize;
use serde_json::Value;

/// `(error_class, message, exit_code)` carried out of a failing command.
pub(crate) type Failure = (&'static str, String, u8);

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\
             \"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Loads config, builds a single-threaded runtime, and drives `work` to a JSON outcome.
///
/// `work` returns the human message plus an optional serializable payload.
pub(crate) fn execute<F, Fut, T>(command: &str, options: &LoadOptions, work: F) -> CommandResult
where
    F: FnOnce(AppConfig) -> Fut,
    Fut: Future<Output = Result<(String, Option<T>), Failure>>,
    T: Serialize,
{
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    match runtime.block_on(work(config)) {
        Ok((message, data)) => {
            let data = match data.map(serde_json::to_value).transpose() {
                Ok(data) => data,
                Err(error) => {
                    return CommandResult::failure(command, "serialization", error.to_string(), 11)
                }
            };
            CommandResult::success_with_data(command, message, data)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}

pub(crate) async fn open_store(config: &AppConfig) -> Result<Arc<SqlWorkflowStore>, Failure> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    Ok(Arc::new(SqlWorkflowStore::new(pool)))
}

/// Maps workflow errors onto the CLI's error classes through the interface layer.
pub(crate) fn application_failure(error: ApplicationError, correlation_id: &str) -> Failure {
    match error.into_interface(correlation_id) {
        InterfaceError::BadRequest { message, .. } => ("workflow_rejected", message, 7),
        InterfaceError::Conflict { message, .. } => ("conflict", message, 8),
        InterfaceError::ServiceUnavailable { message, .. } => ("persistence", message, 9),
        InterfaceError::Internal { message, .. } => ("internal", message, 10),
    }
}

pub(crate) fn new_correlation_id() -> String {
    format!("cli-{}", uuid::Uuid::new_v4())
}
