//! The status-keyed message mapping, with legacy plain-string fallback.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::status::JobStatus;

/// Total budget for the serialized `message` column.
pub const MESSAGE_BLOB_BUDGET: usize = 4_096;

/// Characters reserved for every status other than `failed` when the `failed`
/// message is truncated.
const RESERVED_FOR_OTHER_STATUSES: usize = 1_000;

/// `statusMessages`: either the new map format, or a legacy plain string that
/// is interpreted as the message for whatever status the Job currently holds.
///
/// A Job only ever writes the `Map` variant; `Legacy` is only produced by
/// deserializing a pre-existing row. Once a Job round-trips through `save`,
/// the legacy branch is unreachable for that row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StatusMessages {
    #[default]
    Empty,
    Map(HashMap<JobStatus, String>),
    Legacy(String),
}

impl StatusMessages {
    /// The message to show for `status`: an explicit entry if present,
    /// otherwise the status's default message. A `Legacy` value is only
    /// honored when `status` is the Job's current status, matching "a plain
    /// string is interpreted as the message for the current status".
    pub fn message_for(&self, status: JobStatus, is_current: bool) -> String {
        match self {
            StatusMessages::Empty => status.default_message().to_string(),
            StatusMessages::Map(map) => map
                .get(&status)
                .cloned()
                .unwrap_or_else(|| status.default_message().to_string()),
            StatusMessages::Legacy(message) if is_current => message.clone(),
            StatusMessages::Legacy(_) => status.default_message().to_string(),
        }
    }

    /// Insert or replace the message for `status`, upgrading a legacy string
    /// (if any) into the map format by attributing it to `previous_status`.
    pub fn set(&mut self, status: JobStatus, message: impl Into<String>, previous_status: JobStatus) {
        let mut map = match std::mem::take(self) {
            StatusMessages::Empty => HashMap::new(),
            StatusMessages::Map(map) => map,
            StatusMessages::Legacy(legacy) => {
                let mut map = HashMap::new();
                map.insert(previous_status, legacy);
                map
            }
        };
        map.insert(status, message.into());
        *self = StatusMessages::Map(map);
    }

    /// Serialize to the blob persisted in the `message` column, truncating
    /// the `failed` entry so the whole blob fits `MESSAGE_BLOB_BUDGET`
    /// characters.
    pub fn to_blob(&self) -> Result<String, serde_json::Error> {
        match self {
            StatusMessages::Empty => Ok(String::new()),
            StatusMessages::Legacy(message) => Ok(message.clone()),
            StatusMessages::Map(map) => {
                let mut map = map.clone();
                if let Some(failed_message) = map.get(&JobStatus::Failed) {
                    let budget = MESSAGE_BLOB_BUDGET.saturating_sub(RESERVED_FOR_OTHER_STATUSES);
                    if failed_message.len() > budget {
                        let truncated = truncate_chars(failed_message, budget);
                        map.insert(JobStatus::Failed, truncated);
                    }
                }
                serde_json::to_string(&SerializedMap(map))
            }
        }
    }

    /// Parse a persisted blob. A syntactic failure is treated as a legacy
    /// plain-string message rather than propagated.
    pub fn from_blob(blob: &str) -> Self {
        if blob.is_empty() {
            return StatusMessages::Empty;
        }
        match serde_json::from_str::<SerializedMap>(blob) {
            Ok(SerializedMap(map)) => StatusMessages::Map(map),
            Err(_) => StatusMessages::Legacy(blob.to_string()),
        }
    }
}

/// Wire representation: a map keyed by the serde-renamed `JobStatus` variant.
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
struct SerializedMap(HashMap<JobStatus, String>);

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
