//! Database access for quorum-pub
//!
//! Tables are created by `quorum_common::db`; the modules below hold the
//! queries the publication engine runs against them. Identifiers are stored
//! as TEXT UUIDs and timestamps as RFC 3339 strings.

pub mod campaigns;
pub mod elements;
pub mod external_types;
pub mod locks;
pub mod processes;
pub mod settings;
pub mod tasks;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use std::fmt::Display;
use uuid::Uuid;

use crate::error::{PublishError, PublishResult};

pub use quorum_common::db::{create_schema, init_database};

fn malformed(column: &str, detail: impl Display) -> PublishError {
    PublishError::Common(quorum_common::Error::Internal(format!(
        "Malformed {} column: {}",
        column, detail
    )))
}

pub(crate) fn parse_uuid(column: &str, value: &str) -> PublishResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| malformed(column, e))
}

pub(crate) fn get_uuid(row: &SqliteRow, column: &str) -> PublishResult<Uuid> {
    let value: String = row.try_get(column)?;
    parse_uuid(column, &value)
}

pub(crate) fn get_optional_uuid(row: &SqliteRow, column: &str) -> PublishResult<Option<Uuid>> {
    let value: Option<String> = row.try_get(column)?;
    value.map(|v| parse_uuid(column, &v)).transpose()
}

pub(crate) fn get_timestamp(row: &SqliteRow, column: &str) -> PublishResult<DateTime<Utc>> {
    let value: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| malformed(column, e))
}

pub(crate) fn get_optional_timestamp(
    row: &SqliteRow,
    column: &str,
) -> PublishResult<Option<DateTime<Utc>>> {
    let value: Option<String> = row.try_get(column)?;
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(&v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| malformed(column, e))
        })
        .transpose()
}

pub(crate) fn get_json(row: &SqliteRow, column: &str) -> PublishResult<serde_json::Value> {
    let value: String = row.try_get(column)?;
    Ok(serde_json::from_str(&value)?)
}

/// In-memory database with the full schema
///
/// A single connection: every connection to `sqlite::memory:` opens its own
/// empty database.
#[cfg(test)]
pub(crate) async fn test_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();
    pool
}
