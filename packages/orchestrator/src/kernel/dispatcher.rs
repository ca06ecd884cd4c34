//! Fair work selection.
//!
//! The ordering rules are specified precisely enough to unit-test without a
//! database: [`select_next_user`] is the pure selection over an in-memory
//! summary, and [`next_user`] is the Postgres-backed wrapper that computes
//! that summary with one aggregate query.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

/// One username's aggregate load for a service: total work items it has
/// running, and the most recently worked row among its ready rows.
#[derive(Debug, Clone, PartialEq)]
pub struct UserAggregate {
    pub username: String,
    pub sum_running: i64,
    pub max_last_worked: DateTime<Utc>,
}

/// `nextUser(serviceID)` step 1: least-loaded user wins; ties broken by the
/// user whose busiest row was touched longest ago (primary key =
/// sum(running_count) ascending, secondary key = max(last_worked)
/// ascending). Only users with at least one `readyCount > 0` row are
/// eligible -- `aggregates` must already be filtered to those.
pub fn select_next_user(aggregates: &[UserAggregate]) -> Option<String> {
    aggregates
        .iter()
        .min_by(|a, b| {
            a.sum_running
                .cmp(&b.sum_running)
                .then(a.max_last_worked.cmp(&b.max_last_worked))
        })
        .map(|a| a.username.clone())
}

/// `nextUser(serviceID)`, Postgres-backed: aggregate running/last-worked per
/// username, restricted to usernames with a ready row for this service, then
/// apply [`select_next_user`].
pub async fn next_user<'e, E>(executor: E, service_id: &str) -> Result<Option<String>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let rows: Vec<(String, i64, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT username, SUM(running_count)::bigint AS sum_running, MAX(last_worked) AS max_last_worked
        FROM user_work
        WHERE service_id = $1
          AND username IN (
              SELECT username FROM user_work WHERE service_id = $1 AND ready_count > 0
          )
        GROUP BY username
        "#,
    )
    .bind(service_id)
    .fetch_all(executor)
    .await?;

    let aggregates: Vec<UserAggregate> = rows
        .into_iter()
        .map(|(username, sum_running, max_last_worked)| UserAggregate {
            username,
            sum_running,
            max_last_worked,
        })
        .collect();

    Ok(select_next_user(&aggregates))
}

/// `nextJobId(username, serviceID)` step 2: among that user's ready rows for
/// the service, the one touched longest ago.
pub async fn next_job_id<'e, E>(
    executor: E,
    service_id: &str,
    username: &str,
) -> Result<Option<Uuid>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar(
        r#"
        SELECT job_id
        FROM user_work
        WHERE service_id = $1 AND username = $2 AND ready_count > 0
        ORDER BY last_worked ASC
        LIMIT 1
        "#,
    )
    .bind(service_id)
    .bind(username)
    .fetch_optional(executor)
    .await
}

/// The selection half of `nextWorkItem(serviceID)`: picks the user and job
/// a dispatcher should claim work for next. The caller is responsible for
/// the actual claim (outside the core) and for calling
/// `user_work::increment_running_and_decrement_ready` once it succeeds.
pub async fn next_work_item(
    pool: &sqlx::PgPool,
    service_id: &str,
) -> Result<Option<(String, Uuid)>, sqlx::Error> {
    let Some(username) = next_user(pool, service_id).await? else {
        return Ok(None);
    };
    let job_id = next_job_id(pool, service_id, &username).await?;
    Ok(job_id.map(|job_id| (username, job_id)))
}

/// `getQueuedAndRunningCountForService(serviceID)`, delegated straight to
/// the UserWork repository.
pub async fn queued_and_running_count_for_service<'e, E>(
    executor: E,
    service_id: &str,
) -> Result<i64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    crate::kernel::user_work::get_queued_and_running_count_for_service(executor, service_id).await
}
