//! Job persistence: CRUD, listing with constraints, row locking, and the
//! `save(tx)` orchestration.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::common::pagination::{PaginatedResult, Page};
use crate::error::OrchestratorError;
use crate::kernel::user_work;
use crate::kernel::workflow_step::{self, WorkflowStep};

use super::links::JobLink;
use super::messages::StatusMessages;
use super::model::Job;
use super::status::JobStatus;

/// Sort direction for `orderBy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

impl OrderDirection {
    fn sql(self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// The only two sortable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderField {
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl OrderField {
    fn column(self) -> &'static str {
        match self {
            OrderField::CreatedAt => "created_at",
            OrderField::UpdatedAt => "updated_at",
        }
    }
}

/// Listing filters shared by every query: exact-match, `whereIn`/`whereNotIn`
/// on a whitelist of columns, a date range on `createdAt`/`updatedAt`, and an
/// `orderBy` (defaulting to `createdAt desc`). An empty `Vec` on any `_in`/
/// `_not_in` field means "no filter on that column" -- it is never rendered
/// as an empty `IN ()`, which would otherwise match nothing.
#[derive(Debug, Clone, Default)]
pub struct QueryConstraints {
    pub status_in: Vec<JobStatus>,
    pub status_not_in: Vec<JobStatus>,
    pub service_name_in: Vec<String>,
    pub service_name_not_in: Vec<String>,
    pub provider_id_in: Vec<String>,
    pub provider_id_not_in: Vec<String>,
    pub username_in: Vec<String>,
    pub username_not_in: Vec<String>,
    pub job_id_in: Vec<Uuid>,
    pub job_id_not_in: Vec<Uuid>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub updated_from: Option<DateTime<Utc>>,
    pub updated_to: Option<DateTime<Utc>>,
    pub order_by: OrderField,
    pub order_direction: OrderDirection,
}

impl QueryConstraints {
    pub fn for_username(username: impl Into<String>) -> Self {
        QueryConstraints {
            username_in: vec![username.into()],
            ..Default::default()
        }
    }
}

fn push_where(qb: &mut QueryBuilder<'_, Postgres>, constraints: &QueryConstraints) {
    let mut first = true;
    macro_rules! clause {
        () => {{
            qb.push(if first { " WHERE " } else { " AND " });
            first = false;
        }};
    }

    if !constraints.status_in.is_empty() {
        clause!();
        qb.push("status = ANY(");
        qb.push_bind(constraints.status_in.clone());
        qb.push(")");
    }
    if !constraints.status_not_in.is_empty() {
        clause!();
        qb.push("NOT (status = ANY(");
        qb.push_bind(constraints.status_not_in.clone());
        qb.push("))");
    }
    if !constraints.service_name_in.is_empty() {
        clause!();
        qb.push("service_name = ANY(");
        qb.push_bind(constraints.service_name_in.clone());
        qb.push(")");
    }
    if !constraints.service_name_not_in.is_empty() {
        clause!();
        qb.push("NOT (service_name = ANY(");
        qb.push_bind(constraints.service_name_not_in.clone());
        qb.push("))");
    }
    if !constraints.provider_id_in.is_empty() {
        clause!();
        qb.push("provider_id = ANY(");
        qb.push_bind(constraints.provider_id_in.clone());
        qb.push(")");
    }
    if !constraints.provider_id_not_in.is_empty() {
        clause!();
        qb.push("NOT (provider_id = ANY(");
        qb.push_bind(constraints.provider_id_not_in.clone());
        qb.push("))");
    }
    if !constraints.username_in.is_empty() {
        clause!();
        qb.push("username = ANY(");
        qb.push_bind(constraints.username_in.clone());
        qb.push(")");
    }
    if !constraints.username_not_in.is_empty() {
        clause!();
        qb.push("NOT (username = ANY(");
        qb.push_bind(constraints.username_not_in.clone());
        qb.push("))");
    }
    if !constraints.job_id_in.is_empty() {
        clause!();
        qb.push("job_id = ANY(");
        qb.push_bind(constraints.job_id_in.clone());
        qb.push(")");
    }
    if !constraints.job_id_not_in.is_empty() {
        clause!();
        qb.push("NOT (job_id = ANY(");
        qb.push_bind(constraints.job_id_not_in.clone());
        qb.push("))");
    }
    if let Some(from) = constraints.created_from {
        clause!();
        qb.push("created_at >= ");
        qb.push_bind(from);
    }
    if let Some(to) = constraints.created_to {
        clause!();
        qb.push("created_at <= ");
        qb.push_bind(to);
    }
    if let Some(from) = constraints.updated_from {
        clause!();
        qb.push("updated_at >= ");
        qb.push_bind(from);
    }
    if let Some(to) = constraints.updated_to {
        clause!();
        qb.push("updated_at <= ");
        qb.push_bind(to);
    }
}

/// Scalar columns as stored on the `jobs` row; the "rich" fields (`links`,
/// `labels`, decoded `status_messages`/`collection_ids`) are filled in by
/// [`JobRow::into_job`] from separately-loaded child rows.
#[derive(FromRow)]
struct JobRow {
    job_id: Uuid,
    request_id: Option<Uuid>,
    username: String,
    status: JobStatus,
    status_messages: String,
    progress: i32,
    batches_completed: i32,
    request: String,
    num_input_granules: i32,
    collection_ids: serde_json::Value,
    is_async: bool,
    ignore_errors: bool,
    destination_url: Option<String>,
    service_name: Option<String>,
    provider_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const JOB_COLUMNS: &str = "job_id, request_id, username, status, status_messages, progress, \
     batches_completed, request, num_input_granules, collection_ids, is_async, ignore_errors, \
     destination_url, service_name, provider_id, created_at, updated_at";

impl JobRow {
    fn into_job(self, links: Vec<JobLink>, labels: HashSet<String>) -> Job {
        Job {
            job_id: self.job_id,
            request_id: self.request_id,
            username: self.username,
            status: self.status,
            status_messages: StatusMessages::from_blob(&self.status_messages),
            progress: self.progress,
            batches_completed: self.batches_completed,
            request: self.request,
            num_input_granules: self.num_input_granules,
            collection_ids: serde_json::from_value(self.collection_ids).unwrap_or_default(),
            is_async: self.is_async,
            ignore_errors: self.ignore_errors,
            destination_url: self.destination_url,
            service_name: self.service_name,
            provider_id: self.provider_id,
            labels,
            links,
            created_at: self.created_at,
            updated_at: self.updated_at,
            original_status: self.status,
        }
    }
}

/// `job_links.temporal` is stored as two plain timestamp columns rather than
/// a range type, so links are decoded by hand instead of via `FromRow`.
async fn load_links<'e, E>(executor: E, job_id: Uuid) -> Result<Vec<JobLink>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query(
        "SELECT id, job_id, href, title, link_type, rel, bbox, temporal_start, temporal_end \
         FROM job_links WHERE job_id = $1 ORDER BY id",
    )
    .bind(job_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter()
        .map(|row| {
            let temporal_start: Option<DateTime<Utc>> = row.try_get("temporal_start")?;
            let temporal_end: Option<DateTime<Utc>> = row.try_get("temporal_end")?;
            Ok(JobLink {
                id: row.try_get("id")?,
                job_id: row.try_get("job_id")?,
                href: row.try_get("href")?,
                title: row.try_get("title")?,
                link_type: row.try_get("link_type")?,
                rel: row.try_get("rel")?,
                bbox: row.try_get("bbox")?,
                temporal: temporal_start.zip(temporal_end),
            })
        })
        .collect()
}

async fn load_labels<'e, E>(executor: E, job_id: Uuid) -> Result<HashSet<String>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let labels: Vec<String> = sqlx::query_scalar("SELECT label FROM jobs_labels WHERE job_id = $1")
        .bind(job_id)
        .fetch_all(executor)
        .await?;
    Ok(labels.into_iter().collect())
}

/// Load a Job by id, its links and labels included. Returns `None` rather
/// than erroring when absent.
pub async fn by_job_id(pool: &PgPool, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row: Option<JobRow> = sqlx::query_as(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else { return Ok(None) };
    let links = load_links(pool, job_id).await?;
    let labels = load_labels(pool, job_id).await?;
    Ok(Some(row.into_job(links, labels)))
}

/// Load a Job by id with a row-level exclusive lock held in `tx`, for
/// mutators that read-then-write.
pub async fn by_job_id_locked(
    tx: &mut Transaction<'_, Postgres>,
    job_id: Uuid,
) -> Result<Option<Job>, sqlx::Error> {
    let row: Option<JobRow> = sqlx::query_as(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1 FOR UPDATE"
    ))
    .bind(job_id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(row) = row else { return Ok(None) };
    let links = load_links(&mut **tx, job_id).await?;
    let labels = load_labels(&mut **tx, job_id).await?;
    Ok(Some(row.into_job(links, labels)))
}

pub async fn by_username_and_job_id(
    pool: &PgPool,
    username: &str,
    job_id: Uuid,
) -> Result<Option<Job>, sqlx::Error> {
    let row: Option<JobRow> = sqlx::query_as(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1 AND username = $2"
    ))
    .bind(job_id)
    .bind(username)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else { return Ok(None) };
    let links = load_links(pool, job_id).await?;
    let labels = load_labels(pool, job_id).await?;
    Ok(Some(row.into_job(links, labels)))
}

/// `whereIn`/`whereNotIn`/date-range/`orderBy` listing with offset pagination.
/// Links are not fetched per row to keep a listing query to two
/// round trips regardless of page size; callers needing links use
/// [`by_job_id`] per row.
pub async fn query_all(
    pool: &PgPool,
    constraints: &QueryConstraints,
    page: &Page,
) -> Result<PaginatedResult<Job>, sqlx::Error> {
    let total = count_matching(pool, constraints).await?;

    let mut qb = QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM jobs"));
    push_where(&mut qb, constraints);
    qb.push(" ORDER BY ");
    qb.push(constraints.order_by.column());
    qb.push(" ");
    qb.push(constraints.order_direction.sql());
    qb.push(" LIMIT ");
    qb.push_bind(page.limit());
    qb.push(" OFFSET ");
    qb.push_bind(page.offset());

    let rows: Vec<JobRow> = qb.build_query_as().fetch_all(pool).await?;
    let items = rows.into_iter().map(|row| row.into_job(Vec::new(), HashSet::new())).collect();
    Ok(PaginatedResult::new(items, page, total))
}

pub async fn count_matching(pool: &PgPool, constraints: &QueryConstraints) -> Result<u64, sqlx::Error> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM jobs");
    push_where(&mut qb, constraints);
    let count: i64 = qb.build_query_scalar().fetch_one(pool).await?;
    Ok(count as u64)
}

pub async fn for_user(
    pool: &PgPool,
    username: &str,
    page: &Page,
) -> Result<PaginatedResult<Job>, sqlx::Error> {
    query_all(pool, &QueryConstraints::for_username(username), page).await
}

/// `hasLinks(tx, rel?, spatioTemporal?)`: whether any link row for the job
/// matches the given `rel` and spatiotemporal-coverage filters.
pub async fn has_links<'e, E>(
    executor: E,
    job_id: Uuid,
    rel: Option<&str>,
    spatio_temporal: Option<bool>,
) -> Result<bool, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let mut qb = QueryBuilder::new("SELECT EXISTS(SELECT 1 FROM job_links WHERE job_id = ");
    qb.push_bind(job_id);
    if let Some(rel) = rel {
        qb.push(" AND rel = ");
        qb.push_bind(rel.to_string());
    }
    match spatio_temporal {
        Some(true) => {
            qb.push(" AND (bbox IS NOT NULL OR temporal_start IS NOT NULL)");
        }
        Some(false) => {
            qb.push(" AND bbox IS NULL AND temporal_start IS NULL");
        }
        None => {}
    }
    qb.push(")");
    qb.build_query_scalar().fetch_one(executor).await
}

/// Process-wide, init-once cache of distinct `provider_id` values. Never
/// refreshed or torn down once successfully populated; a transient load
/// failure is logged and
/// answered with an empty list without poisoning the cache for later callers.
static PROVIDER_IDS_SNAPSHOT: OnceCell<Vec<String>> = OnceCell::const_new();

pub async fn get_provider_ids_snapshot(pool: &PgPool) -> Vec<String> {
    if let Some(ids) = PROVIDER_IDS_SNAPSHOT.get() {
        return ids.clone();
    }

    match sqlx::query_scalar::<_, String>(
        "SELECT DISTINCT provider_id FROM jobs WHERE provider_id IS NOT NULL ORDER BY provider_id",
    )
    .fetch_all(pool)
    .await
    {
        Ok(ids) => PROVIDER_IDS_SNAPSHOT.get_or_init(|| async { ids }).await.clone(),
        Err(error) => {
            tracing::warn!(%error, "failed to load provider id snapshot, falling back to empty list");
            Vec::new()
        }
    }
}

/// `getNumInputGranules`: looks up just the `numInputGranules` column for a
/// job, without loading the rest of it. An absent job yields `None` rather
/// than a panic.
pub async fn get_num_input_granules(pool: &PgPool, job_id: Uuid) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT num_input_granules::bigint FROM jobs WHERE job_id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await
}

/// `save(tx)`: write barrier, truncation, blob serialization, the job row
/// itself, append-only links, and label reconciliation, in that order. The
/// caller commits `tx`.
pub async fn save(tx: &mut Transaction<'_, Postgres>, job: &mut Job) -> Result<(), OrchestratorError> {
    job.check_write_barrier()?;

    let request = job.truncated_request();
    let status_messages_blob = job
        .status_messages
        .to_blob()
        .map_err(|e| OrchestratorError::Internal(e.into()))?;
    let collection_ids = serde_json::to_value(&job.collection_ids)
        .map_err(|e| OrchestratorError::Internal(e.into()))?;

    sqlx::query(
        r#"
        INSERT INTO jobs (
            job_id, request_id, username, status, status_messages, progress,
            batches_completed, request, num_input_granules, collection_ids,
            is_async, ignore_errors, destination_url, service_name, provider_id,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, NOW())
        ON CONFLICT (job_id) DO UPDATE SET
            request_id = EXCLUDED.request_id,
            status = EXCLUDED.status,
            status_messages = EXCLUDED.status_messages,
            progress = EXCLUDED.progress,
            batches_completed = EXCLUDED.batches_completed,
            request = EXCLUDED.request,
            num_input_granules = EXCLUDED.num_input_granules,
            collection_ids = EXCLUDED.collection_ids,
            is_async = EXCLUDED.is_async,
            ignore_errors = EXCLUDED.ignore_errors,
            destination_url = EXCLUDED.destination_url,
            service_name = EXCLUDED.service_name,
            provider_id = EXCLUDED.provider_id,
            updated_at = NOW()
        "#,
    )
    .bind(job.job_id)
    .bind(job.request_id())
    .bind(&job.username)
    .bind(job.status)
    .bind(&status_messages_blob)
    .bind(job.progress)
    .bind(job.batches_completed)
    .bind(&request)
    .bind(job.num_input_granules)
    .bind(&collection_ids)
    .bind(job.is_async)
    .bind(job.ignore_errors)
    .bind(&job.destination_url)
    .bind(&job.service_name)
    .bind(&job.provider_id)
    .bind(job.created_at)
    .execute(&mut **tx)
    .await?;

    for link in job.links.iter_mut().filter(|l| l.is_new()) {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO job_links (job_id, href, title, link_type, rel, bbox, temporal_start, temporal_end)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(link.job_id)
        .bind(&link.href)
        .bind(&link.title)
        .bind(&link.link_type)
        .bind(&link.rel)
        .bind(link.bbox.as_deref())
        .bind(link.temporal.map(|t| t.0))
        .bind(link.temporal.map(|t| t.1))
        .fetch_one(&mut **tx)
        .await?;
        link.id = Some(id);
    }

    for label in &job.labels {
        sqlx::query("INSERT INTO labels (label) VALUES ($1) ON CONFLICT (label) DO NOTHING")
            .bind(label)
            .execute(&mut **tx)
            .await?;
        sqlx::query(
            "INSERT INTO jobs_labels (job_id, label) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(job.job_id)
        .bind(label)
        .execute(&mut **tx)
        .await?;
    }

    job.request = request;
    job.original_status = job.status;
    Ok(())
}

/// Convenience for the common case of saving outside an already-open
/// transaction: opens one, calls [`save`], and commits.
pub async fn create(pool: &PgPool, job: &mut Job) -> Result<(), OrchestratorError> {
    let mut tx = pool.begin().await?;
    save(&mut tx, job).await?;
    tx.commit().await?;
    Ok(())
}

/// `pauseAndSave(tx)`: pause the job and zero every UserWork `readyCount`
/// for it in the same transaction, so a paused job stops offering new work
/// the moment the transition commits rather than racing a dispatcher that
/// read stale ready rows between two separate transactions.
pub async fn pause_and_save(pool: &PgPool, job_id: Uuid) -> Result<Job, OrchestratorError> {
    let mut tx = pool.begin().await?;
    let mut job = by_job_id_locked(&mut tx, job_id)
        .await?
        .ok_or_else(|| OrchestratorError::Internal(anyhow::anyhow!("job {job_id} not found")))?;

    job.pause()?;
    save(&mut tx, &mut job).await?;
    user_work::set_ready_count_to_zero(&mut *tx, job_id).await?;

    tx.commit().await?;
    Ok(job)
}

/// `updateProgress(tx)`: load the job's workflow steps, chain and roll them
/// up into a single candidate value, and persist the job only if the
/// candidate advances its current `progress` (monotonicity is enforced by
/// [`Job::rollup_progress`], not here).
pub async fn update_progress(pool: &PgPool, job_id: Uuid) -> Result<Job, OrchestratorError> {
    let mut tx = pool.begin().await?;
    let mut job = by_job_id_locked(&mut tx, job_id)
        .await?
        .ok_or_else(|| OrchestratorError::Internal(anyhow::anyhow!("job {job_id} not found")))?;

    let mut steps = workflow_step::list_for_job(&mut *tx, job_id).await?;
    WorkflowStep::chain_progress(&mut steps);
    job.rollup_progress(&steps);
    save(&mut tx, &mut job).await?;

    tx.commit().await?;
    Ok(job)
}
