use std::env;
use std::fs;
use std::path::Path;

use poflow_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

/// One effective setting with the env var that overrides it.
struct Field {
    key: &'static str,
    value: String,
    env_key: &'static str,
}

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field {
            key: "database.url",
            value: config.database.url.clone(),
            env_key: "POFLOW_DATABASE_URL",
        },
        Field {
            key: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_key: "POFLOW_DATABASE_MAX_CONNECTIONS",
        },
        Field {
            key: "database.timeout_secs",
            value: config.database.timeout_secs.to_string(),
            env_key: "POFLOW_DATABASE_TIMEOUT_SECS",
        },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_key: "POFLOW_LOGGING_LEVEL",
        },
        Field {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_key: "POFLOW_LOGGING_FORMAT",
        },
        Field {
            key: "workflow.directory_preview_limit",
            value: config.workflow.directory_preview_limit.to_string(),
            env_key: "POFLOW_WORKFLOW_DIRECTORY_PREVIEW_LIMIT",
        },
        Field {
            key: "workflow.high_priority_step_threshold",
            value: config.workflow.high_priority_step_threshold.to_string(),
            env_key: "POFLOW_WORKFLOW_HIGH_PRIORITY_STEP_THRESHOLD",
        },
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var(env_key).is_ok_and(|value| !value.trim().is_empty()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
