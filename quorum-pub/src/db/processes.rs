//! Publication process records

use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{get_json, get_optional_timestamp, get_timestamp, get_uuid};
use crate::error::{PublishError, PublishResult};
use crate::models::{Process, ProcessState};

/// Create a process in the `created` state
pub async fn create_process(
    db: &SqlitePool,
    name: &str,
    mode: &str,
    project_id: Uuid,
    configuration: &serde_json::Value,
) -> PublishResult<Process> {
    let process = Process {
        id: Uuid::new_v4(),
        name: name.to_string(),
        mode: mode.to_string(),
        state: ProcessState::Created,
        configuration: configuration.clone(),
        project_id,
        logs: String::new(),
        created: Utc::now(),
        started: None,
        ended: None,
    };

    sqlx::query(
        r#"
        INSERT INTO processes (id, name, mode, state, configuration, project_id, logs, created)
        VALUES (?, ?, ?, ?, ?, ?, '', ?)
        "#,
    )
    .bind(process.id.to_string())
    .bind(&process.name)
    .bind(&process.mode)
    .bind(process.state.as_str())
    .bind(serde_json::to_string(&process.configuration)?)
    .bind(process.project_id.to_string())
    .bind(process.created.to_rfc3339())
    .execute(db)
    .await?;

    Ok(process)
}

/// Load a process by id
pub async fn load_process(db: &SqlitePool, id: Uuid) -> PublishResult<Option<Process>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, mode, state, configuration, project_id, logs, created, started, ended
        FROM processes
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(db)
    .await?;

    row.as_ref().map(process_from_row).transpose()
}

/// Move a process to `running` and stamp its start date
pub async fn mark_running(db: &SqlitePool, id: Uuid) -> PublishResult<()> {
    sqlx::query("UPDATE processes SET state = ?, started = ? WHERE id = ?")
        .bind(ProcessState::Running.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(db)
        .await?;

    Ok(())
}

/// Move a process to a final state and stamp its end date
pub async fn mark_finished(db: &SqlitePool, id: Uuid, state: ProcessState) -> PublishResult<()> {
    sqlx::query("UPDATE processes SET state = ?, ended = ? WHERE id = ?")
        .bind(state.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(db)
        .await?;

    Ok(())
}

/// Append NDJSON lines to the process log
pub async fn append_logs(db: &SqlitePool, id: Uuid, lines: &str) -> PublishResult<()> {
    if lines.is_empty() {
        return Ok(());
    }

    sqlx::query("UPDATE processes SET logs = logs || ? WHERE id = ?")
        .bind(lines)
        .bind(id.to_string())
        .execute(db)
        .await?;

    Ok(())
}

fn process_from_row(row: &SqliteRow) -> PublishResult<Process> {
    let state: String = row.get("state");

    Ok(Process {
        id: get_uuid(row, "id")?,
        name: row.get("name"),
        mode: row.get("mode"),
        state: state
            .parse()
            .map_err(|e: String| PublishError::Common(quorum_common::Error::Internal(e)))?,
        configuration: get_json(row, "configuration")?,
        project_id: get_uuid(row, "project_id")?,
        logs: row.get("logs"),
        created: get_timestamp(row, "created")?,
        started: get_optional_timestamp(row, "started")?,
        ended: get_optional_timestamp(row, "ended")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{campaigns::save_project, test_pool};
    use crate::models::process::PROCESS_MODE_CORPUS_EXPORT;

    #[tokio::test]
    async fn test_process_lifecycle() {
        let pool = test_pool().await;
        let project_id = Uuid::new_v4();
        save_project(&pool, project_id, "Letters", None, None).await.unwrap();

        let process = create_process(
            &pool,
            "Export Letters",
            PROCESS_MODE_CORPUS_EXPORT,
            project_id,
            &serde_json::json!({"corpus": "c1"}),
        )
        .await
        .unwrap();
        assert_eq!(process.state, ProcessState::Created);

        mark_running(&pool, process.id).await.unwrap();
        append_logs(&pool, process.id, "{\"a\":1}\n").await.unwrap();
        append_logs(&pool, process.id, "{\"b\":2}\n").await.unwrap();
        mark_finished(&pool, process.id, ProcessState::Completed).await.unwrap();

        let loaded = load_process(&pool, process.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, ProcessState::Completed);
        assert_eq!(loaded.logs, "{\"a\":1}\n{\"b\":2}\n");
        assert!(loaded.started.is_some());
        assert!(loaded.ended.is_some());
        assert_eq!(loaded.configuration["corpus"], "c1");
    }
}
