//! `UserWork`: per-(job, service) ready/running counters that drive the
//! fairness dispatcher.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct UserWork {
    pub id: i64,
    pub job_id: Uuid,
    pub service_id: String,
    pub username: String,
    pub ready_count: i32,
    pub running_count: i32,
    pub last_worked: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `incrementReadyCount(jobID, serviceID, n=1)`. Creates the row on first
/// use for the pair; `username` is copied in at creation time only.
pub async fn increment_ready_count<'e, E>(
    executor: E,
    job_id: Uuid,
    service_id: &str,
    username: &str,
    n: i32,
) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO user_work (job_id, service_id, username, ready_count, running_count, last_worked)
        VALUES ($1, $2, $3, $4, 0, NOW())
        ON CONFLICT (job_id, service_id) DO UPDATE
        SET ready_count = user_work.ready_count + EXCLUDED.ready_count,
            last_worked = NOW(),
            updated_at = NOW()
        "#,
    )
    .bind(job_id)
    .bind(service_id)
    .bind(username)
    .bind(n)
    .execute(executor)
    .await?;
    Ok(())
}

/// A dispatcher claimed a work item: move one unit from ready to running and
/// refresh `last_worked`.
pub async fn increment_running_and_decrement_ready<'e, E>(
    executor: E,
    job_id: Uuid,
    service_id: &str,
) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        UPDATE user_work
        SET running_count = running_count + 1,
            ready_count = GREATEST(ready_count - 1, 0),
            last_worked = NOW(),
            updated_at = NOW()
        WHERE job_id = $1 AND service_id = $2
        "#,
    )
    .bind(job_id)
    .bind(service_id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Partial-failure recovery: a claimed item is put back on the ready queue.
pub async fn increment_ready_and_decrement_running<'e, E>(
    executor: E,
    job_id: Uuid,
    service_id: &str,
) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        UPDATE user_work
        SET ready_count = ready_count + 1,
            running_count = GREATEST(running_count - 1, 0),
            updated_at = NOW()
        WHERE job_id = $1 AND service_id = $2
        "#,
    )
    .bind(job_id)
    .bind(service_id)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn decrement_running_count<'e, E>(
    executor: E,
    job_id: Uuid,
    service_id: &str,
) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        UPDATE user_work
        SET running_count = GREATEST(running_count - 1, 0),
            updated_at = NOW()
        WHERE job_id = $1 AND service_id = $2
        "#,
    )
    .bind(job_id)
    .bind(service_id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Bulk-zero `readyCount` across every service row for a job; invoked on
/// pause so a paused job stops offering new work.
pub async fn set_ready_count_to_zero<'e, E>(executor: E, job_id: Uuid) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query("UPDATE user_work SET ready_count = 0, updated_at = NOW() WHERE job_id = $1")
        .bind(job_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn delete_user_work_for_job<'e, E>(executor: E, job_id: Uuid) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM user_work WHERE job_id = $1")
        .bind(job_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_user_work_for_job_and_service<'e, E>(
    executor: E,
    job_id: Uuid,
    service_id: &str,
) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM user_work WHERE job_id = $1 AND service_id = $2")
        .bind(job_id)
        .bind(service_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// Removes exactly the rows where both counters are zero.
pub async fn delete_orphaned_rows<'e, E>(executor: E) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM user_work WHERE ready_count = 0 AND running_count = 0")
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// `sum(ready)+sum(running)` across every row for a service.
pub async fn get_queued_and_running_count_for_service<'e, E>(
    executor: E,
    service_id: &str,
) -> Result<i64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let count: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(ready_count + running_count) FROM user_work WHERE service_id = $1",
    )
    .bind(service_id)
    .fetch_one(executor)
    .await?;
    Ok(count.unwrap_or(0))
}

/// Recovery after partial failure: reset `readyCount` for every service row
/// of a job to the current number of `ready` work items for that pair.
/// The work-items table is an external collaborator; only its counter
/// contract (status column with a `ready` value) matters here.
pub async fn recalculate_ready_count<'e, E>(executor: E, job_id: Uuid) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        UPDATE user_work
        SET ready_count = COALESCE((
            SELECT COUNT(*) FROM work_items
            WHERE work_items.job_id = user_work.job_id
              AND work_items.service_id = user_work.service_id
              AND work_items.status = 'ready'
        ), 0),
        updated_at = NOW()
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Bootstrap: rebuild the entire `user_work` table from `work_items`,
/// excluding jobs in `paused`/`previewing` (those jobs' items aren't
/// considered dispatchable), counting items in `ready`/`running`.
///
/// Walks the work-items table one page at a time via the inherited
/// `querySource` quirk: the loop always terminates after the first page
/// regardless of how many rows remain, so on a table larger than one page
/// this reconstructs counts only from the first page's worth of jobs.
/// Preserved verbatim rather than "fixed" per the design decision in
/// DESIGN.md.
pub async fn populate_from_work_items(pool: &sqlx::PgPool) -> Result<u64, sqlx::Error> {
    const PAGE_SIZE: i64 = 5_000;
    let mut page: u32 = 0;

    sqlx::query("DELETE FROM user_work").execute(pool).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO user_work (job_id, service_id, username, ready_count, running_count, last_worked)
        SELECT
            work_items.job_id,
            work_items.service_id,
            jobs.username,
            COUNT(*) FILTER (WHERE work_items.status = 'ready'),
            COUNT(*) FILTER (WHERE work_items.status = 'running'),
            NOW()
        FROM work_items
        JOIN jobs ON jobs.job_id = work_items.job_id
        WHERE jobs.status NOT IN ('paused', 'previewing')
          AND work_items.status IN ('ready', 'running')
        GROUP BY work_items.job_id, work_items.service_id, jobs.username
        LIMIT $1
        "#,
    )
    .bind(PAGE_SIZE)
    .execute(pool)
    .await?;

    crate::common::pagination::advance_page(&mut page, 1);
    Ok(result.rows_affected())
}
