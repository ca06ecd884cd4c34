//! Reaper/dispatcher daemon entrypoint: loads configuration, connects to
//! Postgres, runs pending migrations, and starts the Reaper loop.

use anyhow::{Context, Result};
use orchestrator_core::kernel::reaper::{PostgresReapableStore, Reaper};
use orchestrator_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,orchestrator_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting orchestrator daemon");

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    tracing::info!("database connected");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!("migrations complete");

    let reaper = Reaper::new(
        PostgresReapableStore::new(pool),
        config.reapable_work_age_minutes,
        std::time::Duration::from_secs(config.work_reaper_period_sec),
    );

    tracing::info!(
        reapable_work_age_minutes = config.reapable_work_age_minutes,
        period_sec = config.work_reaper_period_sec,
        "reaper starting"
    );
    reaper.start().await;

    Ok(())
}
