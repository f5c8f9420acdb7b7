//! Client-side progress monitor over a set of task ids.
//!
//! Polls a [`StatusSource`] on a fixed interval and folds the answers into a
//! [`ProgressSnapshot`]:
//!
//! `progress = round(100 * (completed + failed) / total)`, held at 99 until
//! every task is terminal and never lower than a previous poll.
//!
//! Polling stops when every task is terminal, when the wall-clock timeout
//! elapses (a distinct [`MonitorOutcome::TimedOut`]), or on cancellation. A
//! failed query is logged and counts as "no data this tick".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bookforge_core::{JobStatus, TaskId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::status::StatusTracker;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("status query failed: {0}")]
    Query(String),
}

/// Where the monitor reads statuses from (the store directly, or an HTTP API).
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Statuses of the given tasks; tasks without a record are simply absent.
    async fn statuses(
        &self,
        task_ids: &[TaskId],
    ) -> Result<HashMap<TaskId, JobStatus>, MonitorError>;
}

#[async_trait]
impl StatusSource for StatusTracker {
    async fn statuses(
        &self,
        task_ids: &[TaskId],
    ) -> Result<HashMap<TaskId, JobStatus>, MonitorError> {
        let mut out = HashMap::with_capacity(task_ids.len());
        for task_id in task_ids {
            if let Some(record) = self
                .get(*task_id)
                .await
                .map_err(|e| MonitorError::Query(e.to_string()))?
            {
                out.insert(*task_id, record.status());
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Non-terminal or not yet visible.
    pub pending: usize,
    pub progress: u8,
}

impl ProgressSnapshot {
    pub fn is_finished(&self) -> bool {
        self.completed + self.failed == self.total
    }
}

/// Fold one poll's answers into a snapshot (no monotonic adjustment).
pub fn aggregate(task_ids: &[TaskId], statuses: &HashMap<TaskId, JobStatus>) -> ProgressSnapshot {
    let mut snapshot = ProgressSnapshot {
        total: task_ids.len(),
        ..Default::default()
    };
    for task_id in task_ids {
        match statuses.get(task_id) {
            Some(JobStatus::Completed) => snapshot.completed += 1,
            Some(JobStatus::Failed) => snapshot.failed += 1,
            _ => snapshot.pending += 1,
        }
    }

    let done = snapshot.completed + snapshot.failed;
    snapshot.progress = if snapshot.total == 0 {
        100
    } else {
        // round half up
        let pct = (200 * done + snapshot.total) / (2 * snapshot.total);
        if done < snapshot.total {
            pct.min(99) as u8
        } else {
            100
        }
    };
    snapshot
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Every task reached a terminal status.
    Finished(ProgressSnapshot),
    /// The wall-clock timeout elapsed first; carries the last snapshot.
    TimedOut(ProgressSnapshot),
    Cancelled(ProgressSnapshot),
}

impl MonitorOutcome {
    pub fn snapshot(&self) -> &ProgressSnapshot {
        match self {
            MonitorOutcome::Finished(s)
            | MonitorOutcome::TimedOut(s)
            | MonitorOutcome::Cancelled(s) => s,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, MonitorOutcome::TimedOut(_))
    }
}

#[derive(Clone)]
pub struct ProgressMonitor {
    source: Arc<dyn StatusSource>,
    interval: Duration,
    timeout: Duration,
}

impl ProgressMonitor {
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self {
            source,
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Poll until finished or timed out.
    pub async fn poll(&self, task_ids: &[TaskId]) -> MonitorOutcome {
        self.watch(task_ids, &CancellationToken::new(), |_| {}).await
    }

    /// Poll, calling `on_update` after every successful query.
    pub async fn watch<F>(
        &self,
        task_ids: &[TaskId],
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> MonitorOutcome
    where
        F: FnMut(&ProgressSnapshot),
    {
        let mut last = ProgressSnapshot {
            total: task_ids.len(),
            pending: task_ids.len(),
            ..Default::default()
        };

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return MonitorOutcome::Cancelled(last),
                _ = &mut deadline => {
                    warn!(total = last.total, progress = last.progress, "progress monitor timed out");
                    return MonitorOutcome::TimedOut(last);
                }
                _ = ticker.tick() => {}
            }

            match self.source.statuses(task_ids).await {
                Ok(statuses) => {
                    let mut snapshot = aggregate(task_ids, &statuses);
                    snapshot.progress = snapshot.progress.max(last.progress);
                    on_update(&snapshot);
                    last = snapshot;
                    if snapshot.is_finished() {
                        debug!(completed = snapshot.completed, failed = snapshot.failed, "all tasks terminal");
                        return MonitorOutcome::Finished(snapshot);
                    }
                }
                Err(err) => warn!(error = %err, "status poll failed; no data this tick"),
            }
        }
    }

    /// Run in the background, publishing every snapshot on a watch channel.
    pub fn spawn(&self, task_ids: Vec<TaskId>) -> MonitorHandle {
        let (tx, rx) = watch::channel(ProgressSnapshot {
            total: task_ids.len(),
            pending: task_ids.len(),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let monitor = self.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            monitor
                .watch(&task_ids, &token, |snapshot| {
                    let _ = tx.send(*snapshot);
                })
                .await
        });

        MonitorHandle {
            updates: rx,
            cancel,
            join,
        }
    }
}

#[derive(Debug)]
pub struct MonitorHandle {
    updates: watch::Receiver<ProgressSnapshot>,
    cancel: CancellationToken,
    join: JoinHandle<MonitorOutcome>,
}

impl MonitorHandle {
    pub fn updates(&self) -> watch::Receiver<ProgressSnapshot> {
        self.updates.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn outcome(self) -> MonitorOutcome {
        let last = *self.updates.borrow();
        self.join
            .await
            .unwrap_or(MonitorOutcome::Cancelled(last))
    }
}
