//! Client-visible job state machine and its persisted record.
//!
//! `queued → started (5%) → processing (10%..99%) → completed (100%) | failed (0%)`

use core::fmt;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::TaskId;

/// Prefix of every status key in the store.
pub const STATUS_KEY_PREFIX: &str = "task_status:";

/// Default lifetime of a status record, refreshed on every write.
pub const STATUS_TTL: Duration = Duration::from_secs(3600);

pub const STARTED_PROGRESS: u8 = 5;

/// Highest value a non-terminal record may carry.
pub const MAX_PROCESSING_PROGRESS: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Started,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted wire shape: `{status, message, progress, updated_at}`.
///
/// Built only through the per-state constructors so that `progress == 100`
/// holds exactly for `completed` and `progress == 0` for `failed`; decoding
/// rejects records that break this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    status: JobStatus,
    message: String,
    progress: u8,
    /// Unix timestamp (seconds).
    updated_at: i64,
}

impl StatusRecord {
    fn at(status: JobStatus, message: impl Into<String>, progress: u8) -> Self {
        Self {
            status,
            message: message.into(),
            progress,
            updated_at: Utc::now().timestamp(),
        }
    }

    pub fn queued(message: impl Into<String>) -> Self {
        Self::at(JobStatus::Queued, message, 0)
    }

    pub fn started(message: impl Into<String>) -> Self {
        Self::at(JobStatus::Started, message, STARTED_PROGRESS)
    }

    /// Intermediate progress; clamped into `1..=99`.
    pub fn processing(message: impl Into<String>, progress: u8) -> Self {
        Self::at(
            JobStatus::Processing,
            message,
            progress.clamp(1, MAX_PROCESSING_PROGRESS),
        )
    }

    pub fn completed(message: impl Into<String>) -> Self {
        Self::at(JobStatus::Completed, message, 100)
    }

    /// A failed record always resets progress to 0 and carries a non-empty message.
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "job failed".to_string()
        } else {
            message
        };
        Self::at(JobStatus::Failed, message, 0)
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_message(self) -> String {
        self.message
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn check_progress(&self) -> Result<(), DomainError> {
        let consistent = match self.status {
            JobStatus::Completed => self.progress == 100,
            JobStatus::Failed => self.progress == 0,
            _ => self.progress <= MAX_PROCESSING_PROGRESS,
        };
        if consistent {
            Ok(())
        } else {
            Err(DomainError::decode(format!(
                "progress {} is not valid for status {}",
                self.progress, self.status
            )))
        }
    }

    pub fn to_json(&self) -> Result<String, DomainError> {
        serde_json::to_string(self).map_err(|e| DomainError::encode(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, DomainError> {
        let record: Self =
            serde_json::from_str(raw).map_err(|e| DomainError::decode(e.to_string()))?;
        record.check_progress()?;
        Ok(record)
    }
}

/// Store key for a task's status record.
pub fn status_key(task_id: TaskId) -> String {
    format!("{STATUS_KEY_PREFIX}{task_id}")
}

/// Inverse of [`status_key`].
pub fn task_id_from_key(key: &str) -> Option<TaskId> {
    key.strip_prefix(STATUS_KEY_PREFIX)?.parse().ok()
}
