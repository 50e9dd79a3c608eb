//! Per-campaign publication lock
//!
//! At most one run may publish a given campaign. The lock is a row keyed by
//! campaign id; taking it is a single INSERT, so two runs racing for the same
//! campaign cannot both succeed.
//!
//! A lock left behind by a crashed run is taken over once its holder is no
//! longer `created` or `running`, or once it is older than
//! [`STALE_LOCK_HOURS`].

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::parse_uuid;
use crate::error::{PublishError, PublishResult};
use crate::models::ProcessState;

/// Age after which a lock is considered abandoned whatever its holder's state
pub const STALE_LOCK_HOURS: i64 = 24;

/// Take the lock of `campaign_id` for `process_id`
///
/// Fails with `RunInProgress` when another live process holds it.
pub async fn acquire_publication_lock(
    db: &SqlitePool,
    campaign_id: Uuid,
    process_id: Uuid,
) -> PublishResult<()> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO publication_locks (campaign_id, process_id, acquired_at)
        VALUES (?, ?, ?)
        ON CONFLICT(campaign_id) DO NOTHING
        "#,
    )
    .bind(campaign_id.to_string())
    .bind(process_id.to_string())
    .bind(now.to_rfc3339())
    .execute(db)
    .await?;

    if result.rows_affected() > 0 {
        tracing::debug!(campaign_id = %campaign_id, process_id = %process_id, "Publication lock acquired");
        return Ok(());
    }

    let previous = lock_holder(db, campaign_id).await?;
    let stale_before = now - Duration::hours(STALE_LOCK_HOURS);
    let result = sqlx::query(
        r#"
        UPDATE publication_locks
        SET process_id = ?, acquired_at = ?
        WHERE campaign_id = ?
          AND (
            acquired_at < ?
            OR NOT EXISTS (
                SELECT 1 FROM processes p
                WHERE p.id = publication_locks.process_id
                  AND p.state IN (?, ?)
            )
          )
        "#,
    )
    .bind(process_id.to_string())
    .bind(now.to_rfc3339())
    .bind(campaign_id.to_string())
    .bind(stale_before.to_rfc3339())
    .bind(ProcessState::Created.as_str())
    .bind(ProcessState::Running.as_str())
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(PublishError::RunInProgress(campaign_id));
    }

    tracing::warn!(
        campaign_id = %campaign_id,
        process_id = %process_id,
        previous_holder = ?previous,
        "Took over an abandoned publication lock"
    );
    Ok(())
}

/// Release the lock if `process_id` holds it
///
/// Returns whether a lock row was removed.
pub async fn release_publication_lock(
    db: &SqlitePool,
    campaign_id: Uuid,
    process_id: Uuid,
) -> PublishResult<bool> {
    let result =
        sqlx::query("DELETE FROM publication_locks WHERE campaign_id = ? AND process_id = ?")
            .bind(campaign_id.to_string())
            .bind(process_id.to_string())
            .execute(db)
            .await?;

    Ok(result.rows_affected() > 0)
}

/// Process currently holding the lock of `campaign_id`
pub async fn lock_holder(db: &SqlitePool, campaign_id: Uuid) -> PublishResult<Option<Uuid>> {
    let holder: Option<String> =
        sqlx::query_scalar("SELECT process_id FROM publication_locks WHERE campaign_id = ?")
            .bind(campaign_id.to_string())
            .fetch_optional(db)
            .await?;

    holder.map(|id| parse_uuid("process_id", &id)).transpose()
}

/// Number of campaigns currently locked by a run
pub async fn count_locks(db: &SqlitePool) -> PublishResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM publication_locks")
        .fetch_one(db)
        .await?;
    Ok(count)
}
