//! The Reaper: deletes work items and workflow steps belonging to long-dead
//! terminal jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;

use crate::kernel::workflow_step;

/// How work items and workflow steps are deleted each tick. Kept as a
/// trait so the loop logic can be exercised without a `work_items` table
/// (it lives outside the core; only `workflow_steps` does).
#[async_trait::async_trait]
pub trait ReapableStore: Send + Sync {
    async fn reap_work_items(&self, older_than: chrono::DateTime<Utc>) -> Result<u64, sqlx::Error>;
    async fn reap_workflow_steps(&self, older_than: chrono::DateTime<Utc>) -> Result<u64, sqlx::Error>;
}

/// The Postgres-backed store: each delete step runs in its own short
/// transaction, not a shared one, so a failure on one table never rolls
/// back the other.
pub struct PostgresReapableStore {
    pool: PgPool,
}

impl PostgresReapableStore {
    pub fn new(pool: PgPool) -> Self {
        PostgresReapableStore { pool }
    }
}

#[async_trait::async_trait]
impl ReapableStore for PostgresReapableStore {
    async fn reap_work_items(&self, older_than: chrono::DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT work_items.id
            FROM work_items
            JOIN jobs ON jobs.job_id = work_items.job_id
            WHERE jobs.status IN ('failed', 'successful', 'canceled')
              AND jobs.updated_at < $1
            "#,
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM work_items WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn reap_workflow_steps(&self, older_than: chrono::DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let ids = workflow_step::reapable_ids(&self.pool, older_than).await?;
        workflow_step::delete_ids(&self.pool, &ids).await
    }
}

/// Cooperative deletion loop using sleep-based pacing. `start()` runs until
/// `stop()` clears the flag; the in-flight iteration always finishes before
/// the loop exits.
pub struct Reaper<S: ReapableStore> {
    store: S,
    reapable_work_age: chrono::Duration,
    period: Duration,
    running: Arc<AtomicBool>,
}

impl<S: ReapableStore> Reaper<S> {
    pub fn new(store: S, reapable_work_age_minutes: i64, period: Duration) -> Self {
        Reaper {
            store,
            reapable_work_age: chrono::Duration::minutes(reapable_work_age_minutes),
            period,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clonable flag a caller can use to `stop()` the loop from elsewhere
    /// (e.g. a shutdown handler holding only this handle, not the Reaper).
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one tick: delete reapable work items and workflow steps, logging
    /// counts and swallowing any storage error so the loop can continue.
    pub async fn tick(&self) {
        let threshold = Utc::now() - self.reapable_work_age;

        match self.store.reap_work_items(threshold).await {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(count, "reaped work items");
                }
            }
            Err(error) => tracing::warn!(%error, "failed to reap work items"),
        }

        match self.store.reap_workflow_steps(threshold).await {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(count, "reaped workflow steps");
                }
            }
            Err(error) => tracing::warn!(%error, "failed to reap workflow steps"),
        }
    }

    /// Loop while the flag is set, sleeping `period` between ticks.
    /// Flips the flag on so a caller can `stop()` it without racing the
    /// first iteration.
    pub async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            self.tick().await;
            tokio::time::sleep(self.period).await;
        }
    }
}
