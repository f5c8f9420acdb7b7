//! Response shape of the status query, shared by the API and its clients.

use serde::{Deserialize, Serialize};

use crate::id::TaskId;
use crate::status::{JobStatus, StatusRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub message: String,
    pub progress: u8,
}

/// `{status:"success", active_tasks, completed_tasks, failed_tasks, total_tasks}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: String,
    pub active_tasks: Vec<TaskSummary>,
    pub completed_tasks: Vec<TaskSummary>,
    pub failed_tasks: Vec<TaskSummary>,
    pub total_tasks: usize,
}

impl StatusReport {
    /// Bucket records by terminal state; everything non-terminal is "active".
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (TaskId, StatusRecord)>,
    {
        let mut report = Self {
            status: "success".to_string(),
            active_tasks: Vec::new(),
            completed_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            total_tasks: 0,
        };

        for (task_id, record) in records {
            let status = record.status();
            let progress = record.progress();
            let summary = TaskSummary {
                task_id,
                message: record.into_message(),
                progress,
            };
            match status {
                JobStatus::Completed => report.completed_tasks.push(summary),
                JobStatus::Failed => report.failed_tasks.push(summary),
                _ => report.active_tasks.push(summary),
            }
            report.total_tasks += 1;
        }

        report
    }

    /// Coarse status of `task_id` as far as this report can tell.
    ///
    /// Active entries are reported as `Processing`; the exact sub-state is not
    /// on the wire.
    pub fn status_of(&self, task_id: TaskId) -> Option<JobStatus> {
        let has = |tasks: &[TaskSummary]| tasks.iter().any(|t| t.task_id == task_id);
        if has(&self.completed_tasks) {
            Some(JobStatus::Completed)
        } else if has(&self.failed_tasks) {
            Some(JobStatus::Failed)
        } else if has(&self.active_tasks) {
            Some(JobStatus::Processing)
        } else {
            None
        }
    }
}
