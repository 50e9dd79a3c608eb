//! Element queries
//!
//! Elements are read-only to the publication engine except through
//! `save_element`, which imports use and tests seed with.

use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{get_json, get_optional_uuid, get_timestamp, get_uuid};
use crate::error::PublishResult;
use crate::models::{Element, TextOrientation};

const ELEMENT_COLUMNS: &str = "e.id, e.project_id, e.parent_id, e.type_id, e.name, e.element_order, \
     e.text_orientation, e.provider_id, e.provider_object_id, e.transcription, e.created";

/// Child element together with its task in a campaign
#[derive(Debug, Clone)]
pub struct CampaignChild {
    pub element: Element,
    pub task_id: Uuid,
}

/// Save an element
pub async fn save_element(db: &SqlitePool, element: &Element) -> PublishResult<()> {
    sqlx::query(
        r#"
        INSERT INTO elements (
            id, project_id, parent_id, type_id, name, element_order, text_orientation,
            provider_id, provider_object_id, transcription, created
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            parent_id = excluded.parent_id,
            name = excluded.name,
            element_order = excluded.element_order,
            text_orientation = excluded.text_orientation,
            transcription = excluded.transcription
        "#,
    )
    .bind(element.id.to_string())
    .bind(element.project_id.to_string())
    .bind(element.parent_id.map(|id| id.to_string()))
    .bind(element.type_id.to_string())
    .bind(&element.name)
    .bind(element.order)
    .bind(match element.text_orientation {
        TextOrientation::LeftToRight => "left_to_right",
        TextOrientation::RightToLeft => "right_to_left",
    })
    .bind(&element.provider_id)
    .bind(&element.provider_object_id)
    .bind(serde_json::to_string(&element.transcription)?)
    .bind(element.created.to_rfc3339())
    .execute(db)
    .await?;

    Ok(())
}

/// Load an element by id
pub async fn load_element(db: &SqlitePool, id: Uuid) -> PublishResult<Option<Element>> {
    let sql = format!("SELECT {} FROM elements e WHERE e.id = ?", ELEMENT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(db)
        .await?;

    row.as_ref().map(element_from_row).transpose()
}

/// Elements among `ids` imported from `provider_id`, oldest first
///
/// `ids` are raw identifiers read from annotation payloads; values that are
/// not known element ids are simply absent from the result.
pub async fn load_provider_elements(
    db: &SqlitePool,
    ids: &[String],
    provider_id: &str,
) -> PublishResult<Vec<Element>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM elements e WHERE e.provider_id = ",
        ELEMENT_COLUMNS
    ));
    query.push_bind(provider_id);
    query.push(" AND e.id IN (");
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(") ORDER BY e.created, e.id");

    let rows = query.build().fetch_all(db).await?;
    rows.iter().map(element_from_row).collect()
}

/// Keyset cursor over the elements of one type having at least one child
///
/// Ordered by creation date then id, like the task cursor.
pub struct ParentCursor {
    project_id: Uuid,
    type_id: Uuid,
    chunk_size: i64,
    /// Raw `created` and `id` of the last parent returned
    last: Option<(String, String)>,
    exhausted: bool,
}

impl ParentCursor {
    pub fn new(project_id: Uuid, type_id: Uuid, chunk_size: usize) -> Self {
        Self {
            project_id,
            type_id,
            chunk_size: chunk_size.max(1) as i64,
            last: None,
            exhausted: false,
        }
    }

    /// Next chunk of parents; empty once exhausted
    pub async fn next_chunk(&mut self, db: &SqlitePool) -> PublishResult<Vec<Element>> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM elements e WHERE e.project_id = ",
            ELEMENT_COLUMNS
        ));
        query.push_bind(self.project_id.to_string());
        query.push(" AND e.type_id = ");
        query.push_bind(self.type_id.to_string());
        query.push(" AND EXISTS (SELECT 1 FROM elements c WHERE c.parent_id = e.id)");
        if let Some((created, id)) = &self.last {
            query.push(" AND (e.created > ");
            query.push_bind(created.clone());
            query.push(" OR (e.created = ");
            query.push_bind(created.clone());
            query.push(" AND e.id > ");
            query.push_bind(id.clone());
            query.push("))");
        }
        query.push(" ORDER BY e.created, e.id LIMIT ");
        query.push_bind(self.chunk_size);

        let rows = query.build().fetch_all(db).await?;

        if (rows.len() as i64) < self.chunk_size {
            self.exhausted = true;
        }
        if let Some(row) = rows.last() {
            self.last = Some((row.get("created"), row.get("id")));
        }

        rows.iter().map(element_from_row).collect()
    }
}

/// Descendants of `parent_id` (any depth) having a task in `campaign_id`
///
/// Ordered by creation date, then by position among siblings.
pub async fn load_campaign_descendants(
    db: &SqlitePool,
    parent_id: Uuid,
    campaign_id: Uuid,
) -> PublishResult<Vec<CampaignChild>> {
    let sql = format!(
        "WITH RECURSIVE descendants(id) AS (
             SELECT id FROM elements WHERE parent_id = ?
             UNION
             SELECT child.id FROM elements child
             JOIN descendants d ON child.parent_id = d.id
         )
         SELECT {}, t.id AS task_id
         FROM elements e
         JOIN descendants d ON d.id = e.id
         JOIN tasks t ON t.element_id = e.id AND t.campaign_id = ?
         ORDER BY e.created, e.element_order, e.id",
        ELEMENT_COLUMNS
    );

    let rows = sqlx::query(&sql)
        .bind(parent_id.to_string())
        .bind(campaign_id.to_string())
        .fetch_all(db)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(CampaignChild {
                element: element_from_row(row)?,
                task_id: get_uuid(row, "task_id")?,
            })
        })
        .collect()
}

fn element_from_row(row: &SqliteRow) -> PublishResult<Element> {
    let orientation: String = row.get("text_orientation");

    Ok(Element {
        id: get_uuid(row, "id")?,
        project_id: get_uuid(row, "project_id")?,
        parent_id: get_optional_uuid(row, "parent_id")?,
        type_id: get_uuid(row, "type_id")?,
        name: row.get("name"),
        order: row.get("element_order"),
        text_orientation: TextOrientation::parse(&orientation),
        provider_id: row.get("provider_id"),
        provider_object_id: row.get("provider_object_id"),
        transcription: get_json(row, "transcription")?,
        created: get_timestamp(row, "created")?,
    })
}
