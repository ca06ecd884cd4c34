//! `WorkflowStep`: per-(job, service) work-item counts and the weight used
//! for progress rollup.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor};
use typed_builder::TypedBuilder;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct WorkflowStep {
    #[builder(default, setter(strip_option))]
    pub id: Option<i64>,
    pub job_id: Uuid,
    pub service_id: String,
    pub step_index: i32,
    #[builder(default = 0)]
    pub work_item_count: i32,
    #[builder(default = 0)]
    pub completed_work_item_count: i32,
    pub progress_weight: f64,
    /// Derived, not persisted: this step's own completion ratio in `[0,1]`,
    /// filled in by [`WorkflowStep::update_progress`].
    #[builder(default = 0.0)]
    pub progress: f64,
}

impl WorkflowStep {
    /// Per-step completion ratio.
    ///
    /// A step with zero `workItemCount` that has not yet received anything
    /// from its predecessor reports 0. Once the predecessor step is itself
    /// fully complete, a zero-count step is a pass-through stage and reports
    /// 1.0 rather than stalling the rollup at its own never-populated count.
    /// Otherwise it's the straightforward completed/total ratio, clamped
    /// defensively to `[0,1]`.
    pub fn update_progress(&mut self, prev: Option<&WorkflowStep>) {
        self.progress = if self.work_item_count == 0 {
            let predecessor_done = prev
                .map(|p| p.work_item_count > 0 && p.completed_work_item_count == p.work_item_count)
                .unwrap_or(false);
            if predecessor_done {
                1.0
            } else {
                0.0
            }
        } else {
            (self.completed_work_item_count as f64 / self.work_item_count as f64).clamp(0.0, 1.0)
        };
    }

    /// Walk a job's steps in order, feeding each its predecessor so
    /// `progress` reflects the whole chain.
    pub fn chain_progress(steps: &mut [WorkflowStep]) {
        for i in 0..steps.len() {
            let prev = if i == 0 {
                None
            } else {
                Some(steps[i - 1].clone())
            };
            steps[i].update_progress(prev.as_ref());
        }
    }
}

/// Load a job's workflow steps ordered by `step_index`.
pub async fn list_for_job<'e, E>(executor: E, job_id: Uuid) -> Result<Vec<WorkflowStep>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, WorkflowStep>(
        r#"
        SELECT id, job_id, service_id, step_index, work_item_count,
               completed_work_item_count, progress_weight, 0.0::float8 AS progress
        FROM workflow_steps
        WHERE job_id = $1
        ORDER BY step_index ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(executor)
    .await
}

pub async fn create<'e, E>(executor: E, step: &WorkflowStep) -> Result<WorkflowStep, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, WorkflowStep>(
        r#"
        INSERT INTO workflow_steps (job_id, service_id, step_index, work_item_count, completed_work_item_count, progress_weight)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, job_id, service_id, step_index, work_item_count,
                  completed_work_item_count, progress_weight, 0.0::float8 AS progress
        "#,
    )
    .bind(step.job_id)
    .bind(&step.service_id)
    .bind(step.step_index)
    .bind(step.work_item_count)
    .bind(step.completed_work_item_count)
    .bind(step.progress_weight)
    .fetch_one(executor)
    .await
}

/// Reaper predicate: identifiers of steps belonging to terminal jobs
/// whose last update predates `older_than`.
pub async fn reapable_ids<'e, E>(
    executor: E,
    older_than: DateTime<Utc>,
) -> Result<Vec<i64>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar(
        r#"
        SELECT workflow_steps.id
        FROM workflow_steps
        JOIN jobs ON jobs.job_id = workflow_steps.job_id
        WHERE jobs.status IN ('failed', 'successful', 'canceled')
          AND jobs.updated_at < $1
        "#,
    )
    .bind(older_than)
    .fetch_all(executor)
    .await
}

pub async fn delete_ids<'e, E>(executor: E, ids: &[i64]) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    if ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query("DELETE FROM workflow_steps WHERE id = ANY($1)")
        .bind(ids)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
