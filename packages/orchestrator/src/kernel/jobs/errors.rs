//! `JobErrorRecord`: an append-only per-job error record, outside the
//! transition machine.
//!
//! Named `JobErrorRecord` rather than `JobError` to keep it distinct from the
//! Rust error types in [`crate::error`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use typed_builder::TypedBuilder;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobErrorRecord {
    #[builder(default, setter(strip_option))]
    pub id: Option<i64>,
    pub job_id: Uuid,
    pub message: String,
    #[builder(default, setter(strip_option))]
    pub url: Option<String>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

/// Append one error record for a job. Never updated or deduplicated; a job
/// that keeps failing the same way accumulates one row per occurrence.
pub async fn create<'e, E>(executor: E, record: &JobErrorRecord) -> Result<JobErrorRecord, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as(
        r#"
        INSERT INTO job_errors (job_id, message, url, created_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id, job_id, message, url, created_at
        "#,
    )
    .bind(record.job_id)
    .bind(&record.message)
    .bind(&record.url)
    .bind(record.created_at)
    .fetch_one(executor)
    .await
}

/// All error records for a job, oldest first.
pub async fn list_for_job<'e, E>(executor: E, job_id: Uuid) -> Result<Vec<JobErrorRecord>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as(
        "SELECT id, job_id, message, url, created_at FROM job_errors WHERE job_id = $1 ORDER BY id",
    )
    .bind(job_id)
    .fetch_all(executor)
    .await
}
