//! Job model for queued verification runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::job_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Error captured when a node aborts a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

/// The unit of work on a platform queue.
///
/// Owned by the worker holding the lease for the duration of a run; the
/// scheduler and control surface only read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = job_id())]
    pub id: Uuid,

    pub workflow_id: String,
    pub platform: String,

    /// Higher runs first within a platform.
    #[builder(default = 0)]
    pub priority: i32,
    #[builder(default)]
    pub status: JobStatus,

    /// Free-form input merged into node configs for `${name}` substitution.
    #[builder(default)]
    pub params: Map<String, Value>,

    #[builder(default, setter(strip_option))]
    pub current_node: Option<String>,
    #[builder(default = 0.0)]
    pub progress: f64,
    #[builder(default)]
    pub result: Map<String, Value>,
    #[builder(default, setter(strip_option))]
    pub error: Option<JobError>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,

    #[builder(default)]
    pub metadata: Map<String, Value>,
}

impl Job {
    /// Read a string param, if present.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Whether the job has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::builder()
            .workflow_id("product_validation")
            .platform("hwahae")
            .build()
    }

    #[test]
    fn new_job_starts_with_pending_status() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn new_job_has_zero_progress_and_no_error() {
        let job = sample_job();
        assert_eq!(job.progress, 0.0);
        assert!(job.error.is_none());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }

    #[test]
    fn terminal_states() {
        let mut job = sample_job();
        assert!(!job.is_terminal());
        job.status = JobStatus::Failed;
        assert!(job.is_terminal());
        job.status = JobStatus::Completed;
        assert!(job.is_terminal());
    }

    #[test]
    fn param_str_reads_string_params() {
        let mut job = sample_job();
        job.params
            .insert("sale_state".into(), Value::String("on_sale".into()));
        assert_eq!(job.param_str("sale_state"), Some("on_sale"));
        assert_eq!(job.param_str("missing"), None);
    }
}
