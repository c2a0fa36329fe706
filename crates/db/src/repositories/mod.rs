use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::Row;
use thiserror::Error;

use poflow_core::domain::role::Role;
use poflow_core::workflow::store::StoreError;

use crate::DbPool;

pub mod authority;
pub mod directory;
pub mod instance;
pub mod policy;
pub mod template;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => StoreError::Unavailable(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

/// SQLite implementation of every workflow store port.
///
/// Each port lives in its own module as an `impl` block on this type.
#[derive(Clone, Debug)]
pub struct SqlWorkflowStore {
    pool: DbPool,
}

impl SqlWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

fn decimal(row: &SqliteRow, name: &str) -> Result<Decimal, RepositoryError> {
    let raw: String = column(row, name)?;
    Decimal::from_str(&raw)
        .map_err(|error| RepositoryError::Decode(format!("{name} `{raw}`: {error}")))
}

fn optional_decimal(row: &SqliteRow, name: &str) -> Result<Option<Decimal>, RepositoryError> {
    let raw: Option<String> = column(row, name)?;
    raw.map(|value| {
        Decimal::from_str(&value)
            .map_err(|error| RepositoryError::Decode(format!("{name} `{value}`: {error}")))
    })
    .transpose()
}

fn timestamp(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw: String = column(row, name)?;
    parse_timestamp(name, &raw)
}

fn optional_timestamp(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    let raw: Option<String> = column(row, name)?;
    raw.map(|value| parse_timestamp(name, &value)).transpose()
}

fn parse_timestamp(name: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{name} `{raw}`: {error}")))
}

fn role(row: &SqliteRow, name: &str) -> Result<Role, RepositoryError> {
    let raw: String = column(row, name)?;
    Role::from_str(&raw).map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

fn step_order(row: &SqliteRow) -> Result<u32, RepositoryError> {
    let raw: i64 = column(row, "step_order")?;
    u32::try_from(raw)
        .map_err(|_| RepositoryError::Decode(format!("step_order `{raw}` is out of range")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::SqlWorkflowStore;
    use crate::{connect_with_settings, migrations};

    pub async fn migrated_store() -> SqlWorkflowStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlWorkflowStore::new(pool)
    }
}
