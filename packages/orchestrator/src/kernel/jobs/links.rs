//! `JobLink`: append-only output links attached to a Job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// A `rel` value that is never rewritten to a public permalink on display.
pub const STAGING_ACCESS_REL: &str = "s3-access";

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobLink {
    #[builder(default, setter(strip_option))]
    pub id: Option<i64>,
    pub job_id: Uuid,
    pub href: String,
    #[builder(default, setter(strip_option))]
    pub title: Option<String>,
    #[serde(rename = "type")]
    #[builder(default, setter(strip_option))]
    pub link_type: Option<String>,
    #[builder(default, setter(strip_option))]
    pub rel: Option<String>,
    #[builder(default, setter(strip_option))]
    pub bbox: Option<Vec<f64>>,
    #[builder(default, setter(strip_option))]
    pub temporal: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl JobLink {
    /// Links with an existing identifier are append-only: `save` never
    /// updates them.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// A link is rewritten to a public permalink only when it is not a
    /// staging-bucket access link.
    pub fn is_publicly_rewritable(&self) -> bool {
        self.rel.as_deref() != Some(STAGING_ACCESS_REL)
    }
}
