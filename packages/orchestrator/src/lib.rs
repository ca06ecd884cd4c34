//! Orchestrator core: job lifecycle, fairness dispatch, progress rollup, and reaping.
//!
//! This crate assumes a transactional Postgres store and leaves HTTP routing,
//! authentication, metadata-catalog lookups, and object storage to external
//! collaborators. See `kernel::jobs` for the state machine and persistence,
//! `kernel::dispatcher` for fairness selection, and `kernel::reaper` for cleanup.

pub mod common;
pub mod config;
pub mod error;
pub mod kernel;

pub use config::Config;
pub use error::{ConflictError, OrchestratorError, ValidationError};
