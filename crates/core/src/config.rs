//! Runtime settings for the CLI and embedders.
//!
//! Each section starts from its defaults, is patched by an optional `poflow.toml`
//! (missing keys keep their defaults, `${VAR}` expands from the environment), then
//! by `POFLOW_<SECTION>_<KEY>` environment variables, and is validated last.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workflow::router::RouterSettings;

const CONFIG_FILE_CANDIDATES: [&str; 2] = ["poflow.toml", "config/poflow.toml"];

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub workflow: WorkflowConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://poflow.db".to_owned(), max_connections: 5, timeout_secs: 30 }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_owned(), format: LogFormat::Compact }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Cap on the informational "who else holds this role" list in direct mode.
    pub directory_preview_limit: usize,
    /// High-priority orders drop optional steps once more than this many steps match.
    pub high_priority_step_threshold: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let settings = RouterSettings::default();
        Self {
            directory_preview_limit: settings.directory_preview_limit,
            high_priority_step_threshold: settings.high_priority_step_threshold,
        }
    }
}

impl WorkflowConfig {
    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            directory_preview_limit: self.directory_preview_limit,
            high_priority_step_threshold: self.high_priority_step_threshold,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unsupported log format `{other}`")),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    /// Explicit file to read instead of searching the working directory.
    pub config_path: Option<PathBuf>,
    /// Fail when no config file is found.
    pub require_file: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("config file references unset environment variable `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("config file has an unterminated `${{...}}` expression")]
    UnterminatedInterpolation,
    #[error("invalid value for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = match resolve_config_path(options.config_path.as_deref()) {
            Some(path) => read_file(&path)?,
            None if options.require_file => {
                let expected = options
                    .config_path
                    .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
                return Err(ConfigError::MissingConfigFile(expected));
            }
            None => Self::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        env_override(&mut self.database.url, "POFLOW_DATABASE_URL")?;
        env_override(&mut self.database.max_connections, "POFLOW_DATABASE_MAX_CONNECTIONS")?;
        env_override(&mut self.database.timeout_secs, "POFLOW_DATABASE_TIMEOUT_SECS")?;
        env_override(&mut self.logging.level, "POFLOW_LOGGING_LEVEL")?;
        env_override(&mut self.logging.format, "POFLOW_LOGGING_FORMAT")?;
        env_override(
            &mut self.workflow.directory_preview_limit,
            "POFLOW_WORKFLOW_DIRECTORY_PREVIEW_LIMIT",
        )?;
        env_override(
            &mut self.workflow.high_priority_step_threshold,
            "POFLOW_WORKFLOW_HIGH_PRIORITY_STEP_THRESHOLD",
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.database.url.trim();
        if !(url.starts_with("sqlite:") || url == ":memory:") {
            return invalid("database.url must be a sqlite URL (`sqlite://...`, `sqlite::memory:`)");
        }
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be greater than zero");
        }
        if !(1..=300).contains(&self.database.timeout_secs) {
            return invalid("database.timeout_secs must be in range 1..=300");
        }
        if self.logging.level.trim().parse::<tracing::Level>().is_err() {
            return invalid("logging.level must be one of trace|debug|info|warn|error");
        }
        if !(1..=100).contains(&self.workflow.directory_preview_limit) {
            return invalid("workflow.directory_preview_limit must be in range 1..=100");
        }
        Ok(())
    }
}

/// The file `load` would read: the explicit path when it exists, otherwise the first
/// existing default location.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists()),
    }
}

fn read_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&expand_env_refs(&raw)?)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn expand_env_refs(raw: &str) -> Result<String, ConfigError> {
    let mut expanded = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let end = tail.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &tail[..end];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_owned() })?;
        expanded.push_str(&value);
        rest = &tail[end + 1..];
    }
    expanded.push_str(rest);
    Ok(expanded)
}

/// Blank variables count as unset.
fn env_override<T: FromStr>(slot: &mut T, key: &str) -> Result<(), ConfigError> {
    let Some(raw) = env::var(key).ok().filter(|value| !value.trim().is_empty()) else {
        return Ok(());
    };
    *slot = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_owned(), value: raw.clone() })?;
    Ok(())
}

fn invalid(message: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Validation(message.to_owned()))
}
