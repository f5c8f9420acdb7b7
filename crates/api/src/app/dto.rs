use serde::{Deserialize, Serialize};

use bookforge_core::{StatusRecord, TaskId};

/// `202` body for single-envelope kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedResponse {
    pub status: String,
    pub task_id: TaskId,
    pub message: String,
}

/// `202` body for large-book batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedBatchResponse {
    pub status: String,
    pub message: String,
    pub tasks: Vec<TaskId>,
    pub queue: String,
    /// Tasks recorded as `failed` because the broker dropped mid-batch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_enqueued: Vec<TaskId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: String,
    pub message: String,
}

impl ReadyResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "ready".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub record: StatusRecord,
}
