//! Tasks, user assignments and annotations
//!
//! The publication run walks the tasks of a campaign with [`TaskCursor`]
//! (keyset pagination, so chunks stay stable while annotations are being
//! marked) and reads the latest annotation of every eligible assignment.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{get_json, get_optional_uuid, get_timestamp, get_uuid};
use crate::error::{PublishError, PublishResult};
use crate::models::{Annotation, AnnotationState, AssignmentState, Task, UserTask};

/// Latest annotation of one assignment, with the assignment's state
#[derive(Debug, Clone)]
pub struct LatestAnnotation {
    pub annotation: Annotation,
    pub assignment_state: AssignmentState,
    pub assignment_created: DateTime<Utc>,
}

/// Save a task
pub async fn save_task(db: &SqlitePool, task: &Task) -> PublishResult<()> {
    sqlx::query(
        r#"
        INSERT INTO tasks (id, campaign_id, element_id, created)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(task.id.to_string())
    .bind(task.campaign_id.to_string())
    .bind(task.element_id.to_string())
    .bind(task.created.to_rfc3339())
    .execute(db)
    .await?;

    Ok(())
}

/// Save a user assignment
pub async fn save_user_task(db: &SqlitePool, user_task: &UserTask) -> PublishResult<()> {
    sqlx::query(
        r#"
        INSERT INTO user_tasks (id, task_id, user_id, state, is_preview, created)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET state = excluded.state
        "#,
    )
    .bind(user_task.id.to_string())
    .bind(user_task.task_id.to_string())
    .bind(&user_task.user_id)
    .bind(user_task.state.as_str())
    .bind(user_task.is_preview)
    .bind(user_task.created.to_rfc3339())
    .execute(db)
    .await?;

    Ok(())
}

/// Save an annotation version
pub async fn save_annotation(db: &SqlitePool, annotation: &Annotation) -> PublishResult<()> {
    sqlx::query(
        r#"
        INSERT INTO annotations (
            id, user_task_id, parent_id, value, version, published, state, moderator_id, created
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(annotation.id.to_string())
    .bind(annotation.user_task_id.to_string())
    .bind(annotation.parent_id.map(|id| id.to_string()))
    .bind(serde_json::to_string(&annotation.value)?)
    .bind(annotation.version)
    .bind(annotation.published)
    .bind(annotation.state.map(|s| s.as_str()))
    .bind(&annotation.moderator_id)
    .bind(annotation.created.to_rfc3339())
    .execute(db)
    .await?;

    Ok(())
}

/// Load an annotation by id
pub async fn load_annotation(db: &SqlitePool, id: Uuid) -> PublishResult<Option<Annotation>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_task_id, parent_id, value, version, published, state, moderator_id, created
        FROM annotations
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(db)
    .await?;

    row.as_ref().map(annotation_from_row).transpose()
}

/// Load a task by id
pub async fn load_task(db: &SqlitePool, id: Uuid) -> PublishResult<Option<Task>> {
    let row = sqlx::query("SELECT id, campaign_id, element_id, created FROM tasks WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(db)
        .await?;

    row.as_ref().map(task_from_row).transpose()
}

/// Keyset cursor over the tasks of one campaign, ordered by creation date
pub struct TaskCursor {
    campaign_id: Uuid,
    chunk_size: i64,
    /// Raw `created` and `id` of the last task returned
    last: Option<(String, String)>,
    exhausted: bool,
}

impl TaskCursor {
    pub fn new(campaign_id: Uuid, chunk_size: usize) -> Self {
        Self {
            campaign_id,
            chunk_size: chunk_size.max(1) as i64,
            last: None,
            exhausted: false,
        }
    }

    /// Next chunk of tasks; empty once the campaign is exhausted
    pub async fn next_chunk(&mut self, db: &SqlitePool) -> PublishResult<Vec<Task>> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let rows = match &self.last {
            None => {
                sqlx::query(
                    r#"
                    SELECT id, campaign_id, element_id, created
                    FROM tasks
                    WHERE campaign_id = ?
                    ORDER BY created, id
                    LIMIT ?
                    "#,
                )
                .bind(self.campaign_id.to_string())
                .bind(self.chunk_size)
                .fetch_all(db)
                .await?
            }
            Some((created, id)) => {
                sqlx::query(
                    r#"
                    SELECT id, campaign_id, element_id, created
                    FROM tasks
                    WHERE campaign_id = ?
                      AND (created > ? OR (created = ? AND id > ?))
                    ORDER BY created, id
                    LIMIT ?
                    "#,
                )
                .bind(self.campaign_id.to_string())
                .bind(created)
                .bind(created)
                .bind(id)
                .bind(self.chunk_size)
                .fetch_all(db)
                .await?
            }
        };

        if (rows.len() as i64) < self.chunk_size {
            self.exhausted = true;
        }
        if let Some(row) = rows.last() {
            self.last = Some((row.get("created"), row.get("id")));
        }

        rows.iter().map(task_from_row).collect()
    }
}

/// Latest annotation of every eligible assignment of a task
///
/// Eligible: not a preview, in one of `states`, holding at least one
/// annotation. Most recently created assignments come first.
pub async fn load_latest_annotations(
    db: &SqlitePool,
    task_id: Uuid,
    states: &[AssignmentState],
) -> PublishResult<Vec<LatestAnnotation>> {
    if states.is_empty() {
        return Ok(Vec::new());
    }

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT a.id, a.user_task_id, a.parent_id, a.value, a.version, a.published, a.state,
               a.moderator_id, a.created,
               ut.state AS assignment_state, ut.created AS assignment_created
        FROM user_tasks ut
        JOIN annotations a ON a.user_task_id = ut.id
        WHERE ut.task_id = "#,
    );
    query.push_bind(task_id.to_string());
    query.push(
        r#"
          AND ut.is_preview = 0
          AND a.version = (
              SELECT MAX(latest.version) FROM annotations latest
              WHERE latest.user_task_id = ut.id
          )
          AND ut.state IN ("#,
    );
    let mut separated = query.separated(", ");
    for state in states {
        separated.push_bind(state.as_str());
    }
    separated.push_unseparated(") ORDER BY ut.created DESC, ut.id");

    let rows = query.build().fetch_all(db).await?;

    rows.iter()
        .map(|row| {
            let state: String = row.get("assignment_state");
            Ok(LatestAnnotation {
                annotation: annotation_from_row(row)?,
                assignment_state: state.parse().map_err(|e: String| {
                    PublishError::Common(quorum_common::Error::Internal(e))
                })?,
                assignment_created: get_timestamp(row, "assignment_created")?,
            })
        })
        .collect()
}

/// Flag annotations as published, all or none
pub async fn mark_published(db: &SqlitePool, annotation_ids: &[Uuid]) -> PublishResult<u64> {
    if annotation_ids.is_empty() {
        return Ok(0);
    }

    let mut tx = db.begin().await?;

    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new("UPDATE annotations SET published = 1 WHERE id IN (");
    let mut separated = query.separated(", ");
    for id in annotation_ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(")");

    let result = query.build().execute(&mut *tx).await?;
    tx.commit().await?;

    Ok(result.rows_affected())
}

fn task_from_row(row: &SqliteRow) -> PublishResult<Task> {
    Ok(Task {
        id: get_uuid(row, "id")?,
        campaign_id: get_uuid(row, "campaign_id")?,
        element_id: get_uuid(row, "element_id")?,
        created: get_timestamp(row, "created")?,
    })
}

fn annotation_from_row(row: &SqliteRow) -> PublishResult<Annotation> {
    let state: Option<String> = row.get("state");

    Ok(Annotation {
        id: get_uuid(row, "id")?,
        user_task_id: get_uuid(row, "user_task_id")?,
        parent_id: get_optional_uuid(row, "parent_id")?,
        value: get_json(row, "value")?,
        version: row.get("version"),
        published: row.get("published"),
        state: state.as_deref().and_then(AnnotationState::parse),
        moderator_id: row.get("moderator_id"),
        created: get_timestamp(row, "created")?,
    })
}
