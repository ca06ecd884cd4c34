use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    /// Threshold (in minutes) past a terminal job's last update before the
    /// reaper considers its derived rows collectible.
    pub reapable_work_age_minutes: i64,
    /// Reaper loop period, in seconds.
    pub work_reaper_period_sec: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development).
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
            reapable_work_age_minutes: env::var("REAPABLE_WORK_AGE_MINUTES")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("REAPABLE_WORK_AGE_MINUTES must be a valid number")?,
            work_reaper_period_sec: env::var("WORK_REAPER_PERIOD_SEC")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("WORK_REAPER_PERIOD_SEC must be a valid number")?,
        })
    }
}
