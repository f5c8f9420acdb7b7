//! The immutable message describing one unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{PrincipalId, TaskId};
use crate::job::{JobKind, JobSpec, Priority};

/// Envelope published to a lane.
///
/// Fields are private; once built, an envelope is only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    task_id: TaskId,
    submitted_by: PrincipalId,
    submitted_at: DateTime<Utc>,
    #[serde(default)]
    priority: Priority,
    spec: JobSpec,
}

impl JobEnvelope {
    pub fn new(task_id: TaskId, spec: JobSpec, submitted_by: PrincipalId) -> Self {
        Self {
            task_id,
            submitted_by,
            submitted_at: Utc::now(),
            priority: Priority::Normal,
            spec,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_submitted_at(mut self, at: DateTime<Utc>) -> Self {
        self.submitted_at = at;
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn kind(&self) -> JobKind {
        self.spec.kind()
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn submitted_by(&self) -> &PrincipalId {
        &self.submitted_by
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn encode(&self) -> Result<Vec<u8>, DomainError> {
        serde_json::to_vec(self).map_err(|e| DomainError::encode(e.to_string()))
    }

    /// Parse and bounds-check a delivered envelope. Any failure is a
    /// [`DomainError::Decode`]: the message is unusable as it stands.
    pub fn decode(bytes: &[u8]) -> Result<Self, DomainError> {
        let envelope: Self =
            serde_json::from_slice(bytes).map_err(|e| DomainError::decode(e.to_string()))?;
        envelope
            .spec
            .validate()
            .map_err(|e| DomainError::decode(e.to_string()))?;
        Ok(envelope)
    }
}
