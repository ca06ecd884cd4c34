//! The Job finite-state machine.
//!
//! Declared as a two-level lookup table — `(state, event) -> state` — rather
//! than nested conditionals, so the legal transitions follow directly from
//! the table instead of from scattered branches.

use serde::{Deserialize, Serialize};

/// A Job's lifecycle status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Accepted,
    Running,
    RunningWithErrors,
    Previewing,
    Paused,
    Successful,
    CompleteWithErrors,
    Canceled,
    Failed,
}

impl JobStatus {
    /// States accepting new dispatch work.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Accepted
                | JobStatus::Running
                | JobStatus::RunningWithErrors
                | JobStatus::Previewing
        )
    }

    /// States that accept no further mutation (except `Failed -> Failed`).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Successful
                | JobStatus::CompleteWithErrors
                | JobStatus::Canceled
                | JobStatus::Failed
        )
    }

    /// The default human-readable message for a status with no explicit
    /// entry in `statusMessages`.
    pub fn default_message(self) -> &'static str {
        match self {
            JobStatus::Accepted => "The job has been accepted and is waiting to be processed",
            JobStatus::Running => "The job is being processed",
            JobStatus::RunningWithErrors => "The job is being processed, with errors",
            JobStatus::Previewing => "The job is generating a preview before full processing",
            JobStatus::Paused => "The job is paused and may be resumed",
            JobStatus::Successful => "The job has completed successfully",
            JobStatus::CompleteWithErrors => "The job has completed with errors",
            JobStatus::Canceled => "The job has been canceled",
            JobStatus::Failed => "The job failed",
        }
    }
}

/// An event proposed against a Job's current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEvent {
    Start,
    StartWithPreview,
    Complete,
    CompleteWithErrors,
    Cancel,
    Fail,
    Pause,
    Resume,
    SkipPreview,
}

/// The FSM table: `(state, event) -> target state`.
///
/// One row per `(State, Accepted event)` pair, so the table can be read
/// side by side with the design notes.
const TRANSITIONS: &[(JobStatus, JobEvent, JobStatus)] = &[
    (JobStatus::Accepted, JobEvent::Start, JobStatus::Running),
    (
        JobStatus::Accepted,
        JobEvent::StartWithPreview,
        JobStatus::Previewing,
    ),
    (JobStatus::Running, JobEvent::Complete, JobStatus::Successful),
    (
        JobStatus::Running,
        JobEvent::CompleteWithErrors,
        JobStatus::CompleteWithErrors,
    ),
    (JobStatus::Running, JobEvent::Cancel, JobStatus::Canceled),
    (JobStatus::Running, JobEvent::Fail, JobStatus::Failed),
    (JobStatus::Running, JobEvent::Pause, JobStatus::Paused),
    (
        JobStatus::RunningWithErrors,
        JobEvent::Complete,
        JobStatus::Successful,
    ),
    (
        JobStatus::RunningWithErrors,
        JobEvent::CompleteWithErrors,
        JobStatus::CompleteWithErrors,
    ),
    (
        JobStatus::RunningWithErrors,
        JobEvent::Cancel,
        JobStatus::Canceled,
    ),
    (
        JobStatus::RunningWithErrors,
        JobEvent::Fail,
        JobStatus::Failed,
    ),
    (
        JobStatus::RunningWithErrors,
        JobEvent::Pause,
        JobStatus::Paused,
    ),
    (
        JobStatus::Previewing,
        JobEvent::SkipPreview,
        JobStatus::Running,
    ),
    (
        JobStatus::Previewing,
        JobEvent::Cancel,
        JobStatus::Canceled,
    ),
    (JobStatus::Previewing, JobEvent::Fail, JobStatus::Failed),
    (JobStatus::Previewing, JobEvent::Pause, JobStatus::Paused),
    (JobStatus::Paused, JobEvent::SkipPreview, JobStatus::Running),
    (JobStatus::Paused, JobEvent::Resume, JobStatus::Running),
    (JobStatus::Paused, JobEvent::Cancel, JobStatus::Canceled),
    (JobStatus::Paused, JobEvent::Fail, JobStatus::Failed),
    (JobStatus::Failed, JobEvent::Fail, JobStatus::Failed),
];

/// Returns the target status if `event` is permitted from `current`, per the
/// lookup table above.
pub fn transition_target(current: JobStatus, event: JobEvent) -> Option<JobStatus> {
    TRANSITIONS
        .iter()
        .find(|(state, ev, _)| *state == current && *ev == event)
        .map(|(_, _, target)| *target)
}

/// `canTransition(current, desired, event)`: true iff `event`, fed to the FSM
/// in `current`, moves to exactly `desired`.
pub fn can_transition(current: JobStatus, desired: JobStatus, event: JobEvent) -> bool {
    transition_target(current, event) == Some(desired)
}

/// The event that would move `current` to `desired`, if any. Several events
/// can reach the same target from different states (`Resume` and
/// `SkipPreview` both reach `Running` from `Paused`), but for any given
/// `current` state each event maps to exactly one target, so "some event
/// reaches `desired`" is an unambiguous reachability check. Used by
/// `Job::update_status`, which is handed a target status rather than an
/// event name.
pub fn event_for(current: JobStatus, desired: JobStatus) -> Option<JobEvent> {
    TRANSITIONS
        .iter()
        .find(|(state, _, target)| *state == current && *target == desired)
        .map(|(_, event, _)| *event)
}
