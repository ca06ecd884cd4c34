//! Shared builders for integration test data.

use orchestrator_core::kernel::jobs::Job;

/// A minimal valid job for `alice`, ready to be passed to
/// `repository::create`/`repository::save`.
pub fn sample_job(username: &str) -> Job {
    Job::builder()
        .username(username)
        .request(format!("https://example.com/requests/{username}"))
        .build()
}
