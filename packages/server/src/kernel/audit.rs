//! Streaming audit log: one JSONL file per workflow run.
//!
//! Line 1 is a header frame, followed by one record per verified item,
//! closed by a footer frame carrying the run summary. Readers must
//! tolerate a missing footer: a run that died mid-flight leaves its log
//! on disk for inspection, tagged incomplete.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::common::{AuditRecord, AuditStatus};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log not initialized")]
    NotInitialized,
    #[error("audit log already finalized")]
    Finalized,
    #[error("audit log malformed: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub not_found: u64,
    pub match_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderFrame {
    #[serde(rename = "_meta")]
    pub meta: bool,
    #[serde(rename = "type")]
    pub frame_type: String,
    pub job_id: Uuid,
    pub workflow_id: String,
    pub platform: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FooterFrame {
    #[serde(rename = "_meta")]
    pub meta: bool,
    #[serde(rename = "type")]
    pub frame_type: String,
    pub completed_at: DateTime<Utc>,
    pub summary: AuditSummary,
}

/// Monotonic per-run counters backing the footer summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditCounters {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub not_found: u64,
    pub matched: u64,
}

impl AuditCounters {
    pub fn observe(&mut self, record: &AuditRecord) {
        self.total += 1;
        match record.status {
            AuditStatus::Success => self.success += 1,
            AuditStatus::Failed => self.failed += 1,
            AuditStatus::NotFound => self.not_found += 1,
        }
        if record.is_match {
            self.matched += 1;
        }
    }

    pub fn summary(&self) -> AuditSummary {
        let match_rate = if self.total == 0 {
            0.0
        } else {
            self.matched as f64 / self.total as f64
        };
        AuditSummary {
            total: self.total,
            success: self.success,
            failed: self.failed,
            not_found: self.not_found,
            match_rate,
        }
    }
}

/// Append-only writer for a single workflow run.
pub struct AuditWriter {
    path: PathBuf,
    job_id: Uuid,
    workflow_id: String,
    platform: String,
    file: Option<File>,
    counters: AuditCounters,
    finalized: bool,
}

impl AuditWriter {
    /// `{root}/{YYYY-MM-DD}/job_{platform}_{job_id}.jsonl`, dated in the
    /// local zone at start.
    pub fn log_path(root: &Path, platform: &str, job_id: Uuid) -> PathBuf {
        root.join(Local::now().format("%Y-%m-%d").to_string())
            .join(format!("job_{platform}_{job_id}.jsonl"))
    }

    pub fn new(root: &Path, platform: &str, job_id: Uuid, workflow_id: &str) -> Self {
        Self {
            path: Self::log_path(root, platform, job_id),
            job_id,
            workflow_id: workflow_id.to_string(),
            platform: platform.to_string(),
            file: None,
            counters: AuditCounters::default(),
            finalized: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn counters(&self) -> AuditCounters {
        self.counters
    }

    /// Open the file and write the header frame.
    pub async fn initialize(&mut self) -> Result<(), AuditError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        set_group_readable(&self.path).await;

        self.file = Some(file);
        let header = HeaderFrame {
            meta: true,
            frame_type: "header".to_string(),
            job_id: self.job_id,
            workflow_id: self.workflow_id.clone(),
            platform: self.platform.clone(),
            started_at: Utc::now(),
        };
        self.write_line(&serde_json::to_string(&header)?).await
    }

    /// Append one record as a single line.
    pub async fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        if self.finalized {
            return Err(AuditError::Finalized);
        }
        let line = serde_json::to_string(record)?;
        self.write_line(&line).await?;
        self.counters.observe(record);
        Ok(())
    }

    /// Write the footer frame and close the handle.
    pub async fn finalize(&mut self) -> Result<AuditSummary, AuditError> {
        if self.finalized {
            return Err(AuditError::Finalized);
        }
        let summary = self.counters.summary();
        let footer = FooterFrame {
            meta: true,
            frame_type: "footer".to_string(),
            completed_at: Utc::now(),
            summary: summary.clone(),
        };
        self.write_line(&serde_json::to_string(&footer)?).await?;
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        self.finalized = true;
        Ok(summary)
    }

    /// Close without a footer; the log stays on disk tagged incomplete.
    pub async fn cleanup(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush().await;
        }
        self.finalized = true;
    }

    async fn write_line(&mut self, line: &str) -> Result<(), AuditError> {
        let file = self.file.as_mut().ok_or(AuditError::NotInitialized)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

#[cfg(unix)]
async fn set_group_readable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o640)).await;
}

#[cfg(not(unix))]
async fn set_group_readable(_path: &Path) {}

/// A parsed audit log.
#[derive(Debug)]
pub struct AuditLog {
    pub header: HeaderFrame,
    pub records: Vec<AuditRecord>,
    pub footer: Option<FooterFrame>,
}

impl AuditLog {
    /// A complete log ends with a footer; anything else died mid-run.
    pub fn is_complete(&self) -> bool {
        self.footer.is_some()
    }

    pub fn summary(&self) -> Option<&AuditSummary> {
        self.footer.as_ref().map(|footer| &footer.summary)
    }
}

/// Parse a log line-by-line. Meta frames are recognized by `_meta: true`;
/// everything else must be a record.
pub async fn read_audit_log(path: &Path) -> Result<AuditLog, AuditError> {
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();

    let first = lines
        .next_line()
        .await?
        .ok_or_else(|| AuditError::Malformed("log is empty".to_string()))?;
    let header: HeaderFrame = serde_json::from_str(&first)
        .map_err(|_| AuditError::Malformed("first line is not a header frame".to_string()))?;
    if !header.meta || header.frame_type != "header" {
        return Err(AuditError::Malformed(
            "first line is not a header frame".to_string(),
        ));
    }

    let mut records = Vec::new();
    let mut footer = None;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)?;
        if value.get("_meta").and_then(Value::as_bool) == Some(true) {
            match value.get("type").and_then(Value::as_str) {
                Some("footer") => footer = Some(serde_json::from_value(value)?),
                Some(other) => {
                    return Err(AuditError::Malformed(format!("unexpected meta frame: {other}")))
                }
                None => return Err(AuditError::Malformed("meta frame without type".to_string())),
            }
        } else {
            records.push(serde_json::from_value(value)?);
        }
    }

    Ok(AuditLog {
        header,
        records,
        footer,
    })
}
