//! Run report notification contract.
//!
//! Delivery channels are external collaborators; the core only promises
//! the contract and ships a tracing-backed default.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::kernel::audit::AuditSummary;

/// Human-readable summary of one completed verification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub job_id: Uuid,
    pub workflow_id: String,
    pub platform: String,
    pub summary: Option<AuditSummary>,
    pub updates_applied: u64,
    pub update_errors: Vec<String>,
    pub verification_passed: Option<bool>,
}

impl RunReport {
    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "[{}] {} finished (job {})",
            self.platform, self.workflow_id, self.job_id
        )];
        match &self.summary {
            Some(summary) => lines.push(format!(
                "checked {} items: {} ok, {} failed, {} not found, match rate {:.1}%",
                summary.total,
                summary.success,
                summary.failed,
                summary.not_found,
                summary.match_rate * 100.0
            )),
            None => lines.push("no audit summary (run incomplete)".to_string()),
        }
        lines.push(format!("updates applied: {}", self.updates_applied));
        if !self.update_errors.is_empty() {
            lines.push(format!("update errors: {}", self.update_errors.len()));
        }
        if let Some(passed) = self.verification_passed {
            lines.push(format!(
                "verification: {}",
                if passed { "passed" } else { "FAILED" }
            ));
        }
        lines.join("\n")
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &RunReport) -> anyhow::Result<()>;
}

/// Default channel: one structured log line per run.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &RunReport) -> anyhow::Result<()> {
        info!(
            platform = %report.platform,
            job_id = %report.job_id,
            "run report:\n{}",
            report.render()
        );
        Ok(())
    }
}
