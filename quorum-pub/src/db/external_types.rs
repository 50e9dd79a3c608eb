//! Element types and classes mapped to corpus identifiers

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::get_uuid;
use crate::error::PublishResult;
use crate::models::ExternalTypeMapping;

/// Save an element type of a project
pub async fn save_type(
    db: &SqlitePool,
    project_id: Uuid,
    mapping: &ExternalTypeMapping,
    provider_id: &str,
) -> PublishResult<()> {
    save_mapping(db, "types", project_id, mapping, provider_id).await
}

/// Save a class of a project
pub async fn save_class(
    db: &SqlitePool,
    project_id: Uuid,
    mapping: &ExternalTypeMapping,
    provider_id: &str,
) -> PublishResult<()> {
    save_mapping(db, "classes", project_id, mapping, provider_id).await
}

/// Element types of a project imported from `provider_id`
pub async fn load_provider_types(
    db: &SqlitePool,
    project_id: Uuid,
    provider_id: &str,
) -> PublishResult<Vec<ExternalTypeMapping>> {
    load_mappings(db, "types", project_id, provider_id).await
}

/// Classes of a project imported from `provider_id`
pub async fn load_provider_classes(
    db: &SqlitePool,
    project_id: Uuid,
    provider_id: &str,
) -> PublishResult<Vec<ExternalTypeMapping>> {
    load_mappings(db, "classes", project_id, provider_id).await
}

/// Load one element type, whatever its provider
pub async fn load_type(db: &SqlitePool, id: Uuid) -> PublishResult<Option<ExternalTypeMapping>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, COALESCE(provider_object_id, '') AS provider_object_id
        FROM types
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(db)
    .await?;

    row.map(|row| {
        Ok(ExternalTypeMapping {
            id: get_uuid(&row, "id")?,
            name: row.get("name"),
            provider_object_id: row.get("provider_object_id"),
        })
    })
    .transpose()
}

// Table names are never user input
async fn save_mapping(
    db: &SqlitePool,
    table: &'static str,
    project_id: Uuid,
    mapping: &ExternalTypeMapping,
    provider_id: &str,
) -> PublishResult<()> {
    let sql = format!(
        "INSERT INTO {} (id, project_id, name, provider_id, provider_object_id)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             provider_id = excluded.provider_id,
             provider_object_id = excluded.provider_object_id",
        table
    );

    sqlx::query(&sql)
        .bind(mapping.id.to_string())
        .bind(project_id.to_string())
        .bind(&mapping.name)
        .bind(provider_id)
        .bind(&mapping.provider_object_id)
        .execute(db)
        .await?;

    Ok(())
}

async fn load_mappings(
    db: &SqlitePool,
    table: &'static str,
    project_id: Uuid,
    provider_id: &str,
) -> PublishResult<Vec<ExternalTypeMapping>> {
    let sql = format!(
        "SELECT id, name, provider_object_id
         FROM {}
         WHERE project_id = ? AND provider_id = ? AND provider_object_id IS NOT NULL
         ORDER BY name",
        table
    );

    let rows = sqlx::query(&sql)
        .bind(project_id.to_string())
        .bind(provider_id)
        .fetch_all(db)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(ExternalTypeMapping {
                id: get_uuid(row, "id")?,
                name: row.get("name"),
                provider_object_id: row.get("provider_object_id"),
            })
        })
        .collect()
}
