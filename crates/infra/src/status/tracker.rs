use std::sync::Arc;
use std::time::Duration;

use bookforge_core::status::{STATUS_KEY_PREFIX, STATUS_TTL, status_key, task_id_from_key};
use bookforge_core::{StatusRecord, StatusReport, TaskId};
use tracing::{debug, warn};

use super::{StatusStore, StatusStoreError};

/// Typed access to status records.
///
/// Writers go through [`StatusTracker::record`], which never fails: a store
/// outage costs progress visibility, never the job itself.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn StatusStore>,
    ttl: Duration,
}

impl std::fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTracker").field("ttl", &self.ttl).finish()
    }
}

impl StatusTracker {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self {
            store,
            ttl: STATUS_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Write a record, surfacing store failures.
    pub async fn write(&self, task_id: TaskId, record: &StatusRecord) -> Result<(), StatusStoreError> {
        let key = status_key(task_id);
        let value = record.to_json().map_err(|e| StatusStoreError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.store.set_with_expiry(&key, value, self.ttl).await
    }

    /// Best-effort write. Returns whether the record was stored.
    pub async fn record(&self, task_id: TaskId, record: StatusRecord) -> bool {
        match self.write(task_id, &record).await {
            Ok(()) => {
                debug!(
                    task_id = %task_id,
                    status = %record.status(),
                    progress = record.progress(),
                    "status recorded"
                );
                true
            }
            Err(err) => {
                warn!(
                    task_id = %task_id,
                    status = %record.status(),
                    error = %err,
                    "status write failed; continuing"
                );
                false
            }
        }
    }

    pub async fn get(&self, task_id: TaskId) -> Result<Option<StatusRecord>, StatusStoreError> {
        let key = status_key(task_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        StatusRecord::from_json(&raw)
            .map(Some)
            .map_err(|e| StatusStoreError::Corrupt {
                key,
                reason: e.to_string(),
            })
    }

    /// Every live record. Keys that vanish between scan and read, or that hold
    /// undecodable values, are skipped.
    pub async fn all(&self) -> Result<Vec<(TaskId, StatusRecord)>, StatusStoreError> {
        let keys = self.store.scan(STATUS_KEY_PREFIX).await?;
        let mut records = Vec::with_capacity(keys.len());

        for key in keys {
            let Some(task_id) = task_id_from_key(&key) else {
                debug!(key = %key, "ignoring foreign key under status prefix");
                continue;
            };
            match self.get(task_id).await {
                Ok(Some(record)) => records.push((task_id, record)),
                Ok(None) => {}
                Err(StatusStoreError::Corrupt { key, reason }) => {
                    warn!(key = %key, reason = %reason, "skipping corrupt status record");
                }
                Err(err) => return Err(err),
            }
        }

        records.sort_by_key(|(task_id, _)| *task_id);
        Ok(records)
    }

    pub async fn report(&self) -> Result<StatusReport, StatusStoreError> {
        Ok(StatusReport::from_records(self.all().await?))
    }
}
