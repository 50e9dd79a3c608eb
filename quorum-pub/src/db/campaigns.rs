//! Project and campaign persistence

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{get_json, get_uuid};
use crate::error::{PublishError, PublishResult};
use crate::models::{Campaign, CampaignMode};

/// Save a project
pub async fn save_project(
    db: &SqlitePool,
    id: Uuid,
    name: &str,
    provider_id: Option<&str>,
    provider_object_id: Option<&str>,
) -> PublishResult<()> {
    sqlx::query(
        r#"
        INSERT INTO projects (id, name, provider_id, provider_object_id)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            provider_id = excluded.provider_id,
            provider_object_id = excluded.provider_object_id
        "#,
    )
    .bind(id.to_string())
    .bind(name)
    .bind(provider_id)
    .bind(provider_object_id)
    .execute(db)
    .await?;

    Ok(())
}

/// Save a campaign
pub async fn save_campaign(db: &SqlitePool, campaign: &Campaign) -> PublishResult<()> {
    sqlx::query(
        r#"
        INSERT INTO campaigns (id, project_id, name, mode, configuration)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            mode = excluded.mode,
            configuration = excluded.configuration
        "#,
    )
    .bind(campaign.id.to_string())
    .bind(campaign.project_id.to_string())
    .bind(&campaign.name)
    .bind(campaign.mode.as_str())
    .bind(serde_json::to_string(&campaign.configuration)?)
    .execute(db)
    .await?;

    Ok(())
}

/// Load a campaign by id
pub async fn load_campaign(db: &SqlitePool, id: Uuid) -> PublishResult<Option<Campaign>> {
    let row = sqlx::query(
        r#"
        SELECT id, project_id, name, mode, configuration
        FROM campaigns
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(db)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mode_str: String = row.get("mode");
    let mode: CampaignMode = mode_str.parse().map_err(|e: String| {
        PublishError::Common(quorum_common::Error::Internal(format!(
            "Campaign {}: {}",
            id, e
        )))
    })?;

    Ok(Some(Campaign {
        id: get_uuid(&row, "id")?,
        project_id: get_uuid(&row, "project_id")?,
        name: row.get("name"),
        mode,
        configuration: get_json(&row, "configuration")?,
    }))
}
