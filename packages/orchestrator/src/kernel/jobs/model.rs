//! The `Job` entity: fields, validation, and the state-machine mutators.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::ConflictError;

use super::links::{JobLink, STAGING_ACCESS_REL};
use super::messages::StatusMessages;
use super::status::{self, JobStatus};
use crate::kernel::workflow_step::WorkflowStep;

/// `request` and the serialized message blob share this budget.
pub const REQUEST_BUDGET: usize = 4_096;

/// Data expires 30 days after creation when the job has no destination URL.
const DATA_EXPIRATION_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub job_id: Uuid,

    /// Defaults to `job_id`: initially a job IS its own request.
    #[builder(default, setter(strip_option))]
    pub request_id: Option<Uuid>,

    pub username: String,

    #[builder(default)]
    pub status: JobStatus,

    #[builder(default)]
    pub status_messages: StatusMessages,

    #[builder(default = 0)]
    pub progress: i32,

    #[builder(default = 0)]
    pub batches_completed: i32,

    pub request: String,

    #[builder(default = 0)]
    pub num_input_granules: i32,

    #[builder(default)]
    pub collection_ids: Vec<String>,

    #[builder(default = false)]
    pub is_async: bool,

    #[builder(default = false)]
    pub ignore_errors: bool,

    #[builder(default, setter(strip_option))]
    pub destination_url: Option<String>,

    #[builder(default, setter(strip_option))]
    pub service_name: Option<String>,

    #[builder(default, setter(strip_option))]
    pub provider_id: Option<String>,

    #[builder(default)]
    pub labels: HashSet<String>,

    /// Populated by the repository when `includeLinks` is requested;
    /// otherwise empty. `save` only ever inserts the entries with no `id`.
    #[builder(default)]
    pub links: Vec<JobLink>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,

    /// The status this Job held when loaded from the store; never touched
    /// after load. Drives the terminal write barrier in `save`.
    #[builder(default)]
    pub original_status: JobStatus,
}

impl Job {
    /// The originating request's id; equal to `job_id` until overridden.
    pub fn request_id(&self) -> Uuid {
        self.request_id.unwrap_or(self.job_id)
    }

    /// Field-level validation. Returns every failure found rather than
    /// stopping at the first, so a caller can report them all at once.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !(0..=100).contains(&self.progress) {
            errors.push(format!("progress must be between 0 and 100, got {}", self.progress));
        }
        if self.batches_completed < 0 {
            errors.push(format!(
                "batchesCompleted must not be negative, got {}",
                self.batches_completed
            ));
        }
        if self.num_input_granules < 0 {
            errors.push(format!(
                "numInputGranules must not be negative, got {}",
                self.num_input_granules
            ));
        }
        if !(self.request.starts_with("http://") || self.request.starts_with("https://")) {
            errors.push(format!("request must be an http(s) URL, got {:?}", self.request));
        }

        errors
    }

    /// Truncate `request` to [`REQUEST_BUDGET`] characters, preserving it
    /// unchanged if already within budget.
    pub fn truncated_request(&self) -> String {
        truncate_chars(&self.request, REQUEST_BUDGET)
    }

    /// The message for the Job's current status: an explicit entry if
    /// present, else the status's default.
    pub fn message(&self) -> String {
        self.status_messages.message_for(self.status, true)
    }

    pub fn has_terminal_status(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_paused(&self) -> bool {
        self.status == JobStatus::Paused
    }

    pub fn belongs_to_or_is_admin(&self, user: &str, is_admin: bool) -> bool {
        is_admin || self.username == user
    }

    /// `createdAt + 30 days` unless a `destination_url` was set, in which
    /// case the data lives wherever that destination manages its own
    /// lifecycle and this job has no expiration of its own.
    pub fn data_expiration(&self) -> Option<DateTime<Utc>> {
        if self.destination_url.is_some() {
            None
        } else {
            Some(self.created_at + Duration::days(DATA_EXPIRATION_DAYS))
        }
    }

    /// A link whose `href` carries `token=<token>` marks the job shareable
    /// under that token; there is no separate share-token column in the
    /// data model, so this is read directly off the job's own links.
    pub fn is_shareable(&self, token: &str) -> bool {
        let needle = format!("token={token}");
        self.links.iter().any(|link| link.href.contains(&needle))
    }

    /// Append a link. Actual persistence (insert-only, skip if it already
    /// has an id) happens in `repository::save`.
    pub fn add_link(&mut self, link: JobLink) {
        self.links.push(link);
    }

    /// Convenience for the common case: a staging-bucket access link, never
    /// rewritten to a public permalink on display.
    pub fn add_staging_bucket_link(&mut self, href: impl Into<String>) {
        self.add_link(
            JobLink::builder()
                .job_id(self.job_id)
                .href(href.into())
                .rel(STAGING_ACCESS_REL.to_string())
                .build(),
        );
    }

    /// Telemetry counter; has no bearing on `status` or `progress`.
    pub fn complete_batch(&mut self) {
        self.batches_completed += 1;
    }

    /// The sole setter of `status`. `desired` must be reachable from
    /// the current status via *some* permitted event, per the FSM table;
    /// forces `progress = 100` on the two success-shaped terminal states.
    pub fn update_status(
        &mut self,
        desired: JobStatus,
        message: Option<String>,
    ) -> Result<(), ConflictError> {
        if status::event_for(self.status, desired).is_none() {
            return Err(ConflictError {
                from: self.status,
                to: desired,
            });
        }

        let previous = self.status;
        self.status = desired;
        if let Some(message) = message {
            self.status_messages.set(desired, message, previous);
        }
        if matches!(desired, JobStatus::Successful | JobStatus::CompleteWithErrors) {
            self.progress = 100;
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), ConflictError> {
        self.update_status(JobStatus::Paused, None)
    }

    pub fn resume(&mut self) -> Result<(), ConflictError> {
        self.update_status(JobStatus::Running, None)
    }

    pub fn skip_preview(&mut self) -> Result<(), ConflictError> {
        self.update_status(JobStatus::Running, None)
    }

    pub fn fail(&mut self, message: Option<String>) -> Result<(), ConflictError> {
        self.update_status(JobStatus::Failed, message)
    }

    pub fn cancel(&mut self, message: Option<String>) -> Result<(), ConflictError> {
        self.update_status(JobStatus::Canceled, message)
    }

    pub fn succeed(&mut self, message: Option<String>) -> Result<(), ConflictError> {
        self.update_status(JobStatus::Successful, message)
    }

    pub fn complete_with_errors(&mut self, message: Option<String>) -> Result<(), ConflictError> {
        self.update_status(JobStatus::CompleteWithErrors, message)
    }

    /// Write barrier checked by `repository::save` before anything else:
    /// a job loaded in a terminal status rejects every further write except
    /// the idempotent `failed -> failed` re-fail.
    pub fn check_write_barrier(&self) -> Result<(), ConflictError> {
        if self.original_status.is_terminal()
            && !(self.original_status == JobStatus::Failed && self.status == JobStatus::Failed)
        {
            return Err(ConflictError {
                from: self.original_status,
                to: self.status,
            });
        }
        Ok(())
    }

    /// Rolls up already-chained workflow steps into a single progress value
    /// (each step's own `progress` ratio must already reflect its predecessor; see
    /// [`WorkflowStep::update_progress`]). Returns whether `self.progress`
    /// changed.
    pub fn rollup_progress(&mut self, steps: &[WorkflowStep]) -> bool {
        let weighted: f64 = steps.iter().map(|s| s.progress_weight * s.progress).sum();
        let total: f64 = steps.iter().map(|s| s.progress_weight).sum::<f64>().max(1.0);
        let candidate = (weighted / total).floor() as i32;
        let candidate = candidate.clamp(0, 99);

        if candidate > self.progress {
            self.progress = candidate;
            true
        } else {
            false
        }
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// The outward form of a Job for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedJob {
    pub job_id: Uuid,
    pub username: String,
    pub status: JobStatus,
    pub message: String,
    pub progress: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_expiration: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<JobLink>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    pub request: String,
    pub num_input_granules: i32,
}

impl Job {
    /// Build the display form. When `permalink_root` is given, every link
    /// whose `rel` is not `s3-access` is rewritten to `{root}/{job_id}/{href
    /// basename}` -- unless the job itself has a `destination_url`, in which
    /// case links already point at the user's own destination and are left
    /// alone.
    pub fn to_serialized(&self, permalink_root: Option<&str>) -> SerializedJob {
        let rewrite = permalink_root.filter(|_| self.destination_url.is_none());
        let links = self
            .links
            .iter()
            .cloned()
            .map(|mut link| {
                if let Some(root) = rewrite {
                    if link.is_publicly_rewritable() {
                        let basename = link.href.rsplit('/').next().unwrap_or(&link.href).to_string();
                        link.href = format!("{}/{}/{}", root.trim_end_matches('/'), self.job_id, basename);
                    }
                }
                link
            })
            .collect();

        let mut labels: Vec<String> = self.labels.iter().cloned().collect();
        labels.sort();

        SerializedJob {
            job_id: self.job_id,
            username: self.username.clone(),
            status: self.status,
            message: self.message(),
            progress: self.progress,
            created_at: self.created_at,
            updated_at: self.updated_at,
            data_expiration: self.data_expiration(),
            links,
            labels,
            request: self.request.clone(),
            num_input_granules: self.num_input_granules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::builder()
            .username("alice")
            .request("https://example.com/request")
            .build()
    }

    #[test]
    fn new_job_is_accepted_with_zero_progress() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Accepted);
        assert_eq!(job.progress, 0);
    }

    #[test]
    fn request_id_defaults_to_job_id() {
        let job = sample_job();
        assert_eq!(job.request_id(), job.job_id);
    }

    #[test]
    fn start_then_complete_reaches_successful_with_full_progress() {
        let mut job = sample_job();
        job.update_status(JobStatus::Running, None).unwrap();
        job.update_status(JobStatus::Successful, None).unwrap();
        assert_eq!(job.status, JobStatus::Successful);
        assert_eq!(job.progress, 100);
        assert_eq!(job.message(), "The job has completed successfully");
    }

    #[test]
    fn pause_resume_then_complete_succeeds_but_resume_from_running_conflicts() {
        let mut job = sample_job();
        job.update_status(JobStatus::Running, None).unwrap();
        job.pause().unwrap();
        job.resume().unwrap();
        job.update_status(JobStatus::Successful, None).unwrap();
        assert_eq!(job.status, JobStatus::Successful);
        assert_eq!(job.progress, 100);

        let mut running_job = sample_job();
        running_job.update_status(JobStatus::Running, None).unwrap();
        assert!(running_job.resume().is_err());
    }

    #[test]
    fn non_http_request_fails_validation() {
        let job = Job::builder()
            .username("alice")
            .request("ftp://x")
            .build();
        let errors = job.validate();
        assert!(errors.iter().any(|e| e.contains("http(s)")));
    }

    #[test]
    fn invalid_transition_leaves_status_unchanged() {
        let mut job = sample_job();
        let before = job.status;
        assert!(job.pause().is_err());
        assert_eq!(job.status, before);
    }

    #[test]
    fn write_barrier_rejects_mutation_of_loaded_terminal_job() {
        let mut job = sample_job();
        job.update_status(JobStatus::Running, None).unwrap();
        job.update_status(JobStatus::Successful, None).unwrap();
        job.original_status = JobStatus::Successful;
        assert!(job.check_write_barrier().is_err());
    }

    #[test]
    fn write_barrier_allows_idempotent_failed_to_failed() {
        let mut job = sample_job();
        job.original_status = JobStatus::Failed;
        job.status = JobStatus::Failed;
        assert!(job.check_write_barrier().is_ok());
    }

    #[test]
    fn request_round_trips_when_within_budget() {
        let job = sample_job();
        assert_eq!(job.truncated_request(), job.request);
    }

    #[test]
    fn request_is_truncated_past_budget() {
        let job = Job::builder()
            .username("alice")
            .request(format!("https://example.com/{}", "x".repeat(5_000)))
            .build();
        assert_eq!(job.truncated_request().chars().count(), REQUEST_BUDGET);
    }

    #[test]
    fn data_expiration_is_30_days_after_creation_without_destination() {
        let job = sample_job();
        assert_eq!(
            job.data_expiration(),
            Some(job.created_at + Duration::days(30))
        );
    }

    #[test]
    fn data_expiration_is_none_with_destination_url() {
        let job = Job::builder()
            .username("alice")
            .request("https://example.com/request")
            .destination_url("s3://bucket/prefix")
            .build();
        assert_eq!(job.data_expiration(), None);
    }

    #[test]
    fn rollup_does_not_regress_progress_below_current() {
        let mut job = sample_job();
        job.progress = 10;
        let steps = vec![
            WorkflowStep::builder()
                .job_id(job.job_id)
                .service_id("svc-a")
                .step_index(0)
                .work_item_count(2)
                .completed_work_item_count(1)
                .progress_weight(1.0)
                .build(),
            WorkflowStep::builder()
                .job_id(job.job_id)
                .service_id("svc-b")
                .step_index(1)
                .work_item_count(4)
                .completed_work_item_count(0)
                .progress_weight(3.0)
                .build(),
        ];
        let mut steps = steps;
        WorkflowStep::chain_progress(&mut steps);
        let changed = job.rollup_progress(&steps);
        assert!(!changed);
        assert_eq!(job.progress, 10);
    }

    #[test]
    fn rollup_advances_progress_when_all_steps_complete() {
        let mut job = sample_job();
        job.progress = 0;
        let mut steps = vec![WorkflowStep::builder()
            .job_id(job.job_id)
            .service_id("svc-a")
            .step_index(0)
            .work_item_count(4)
            .completed_work_item_count(4)
            .progress_weight(1.0)
            .build()];
        WorkflowStep::chain_progress(&mut steps);
        assert!(job.rollup_progress(&steps));
        assert_eq!(job.progress, 1);
    }

    #[test]
    fn only_success_states_reach_100_via_update_status() {
        let mut job = sample_job();
        job.progress = 42;
        job.update_status(JobStatus::Running, None).unwrap();
        assert_eq!(job.progress, 42);
        job.update_status(JobStatus::CompleteWithErrors, None).unwrap();
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn shareable_link_matches_token_query_param() {
        let mut job = sample_job();
        job.add_link(
            JobLink::builder()
                .job_id(job.job_id)
                .href("https://example.com/download?token=abc123")
                .build(),
        );
        assert!(job.is_shareable("abc123"));
        assert!(!job.is_shareable("other"));
    }
}
