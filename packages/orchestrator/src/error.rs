//! Typed error kinds for the job core.
//!
//! `ValidationError` and `ConflictError` are branched on by callers; storage
//! and other infrastructure failures are carried as `anyhow::Error` and only
//! wrapped into `OrchestratorError` at the crate boundary. `NotFound` has no
//! variant here on purpose: queries by id return `Option::None`.

use thiserror::Error;

use crate::kernel::jobs::status::JobStatus;

/// Accumulated validation failures from `Job::validate()`.
///
/// Represented as a list rather than a single message because a Job can fail
/// more than one field check at once (e.g. negative `batchesCompleted` and a
/// malformed `request` URL).
#[derive(Debug, Error)]
#[error("job failed validation: {}", .0.join("; "))]
pub struct ValidationError(pub Vec<String>);

impl ValidationError {
    pub fn single(message: impl Into<String>) -> Self {
        ValidationError(vec![message.into()])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A disallowed state transition, or a mutation attempted against a job whose
/// stored status is already terminal.
#[derive(Debug, Error)]
#[error("cannot move job from {from:?} to {to:?}")]
pub struct ConflictError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Top-level error type for fallible operations that cross the crate boundary.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
