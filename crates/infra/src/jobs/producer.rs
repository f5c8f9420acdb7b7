//! Submission side: envelope construction, initial status, publish.

use std::sync::Arc;

use bookforge_core::{
    JobEnvelope, JobKind, JobParameters, JobSpec, PrincipalId, Priority, StatusRecord,
    SubmitParams, TaskId,
};
use bookforge_events::{Broker, BrokerError, Lane, OutboundMessage};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::status::StatusTracker;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProducerError {
    /// The broker could not be reached; retrying is the caller's call.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<BrokerError> for ProducerError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Unavailable(msg) => ProducerError::Unavailable(msg),
            other => ProducerError::Internal(other.to_string()),
        }
    }
}

/// Result of one accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub kind: JobKind,
    pub lane: Lane,
    pub parameters: JobParameters,
    /// Published ids: one for `book`/`image`; one per book for `large_book`.
    pub task_ids: Vec<TaskId>,
    /// Batch members left unpublished after a broker failure; each has a
    /// `failed` record.
    pub not_enqueued: Vec<TaskId>,
}

/// Builds envelopes and puts them on their lane.
///
/// Every envelope gets a `queued` record before it is published; the lane is
/// declared first so that an unreachable broker leaves no record behind.
///
/// The whole batch is encoded before anything is written. If publishing
/// fails partway, the published envelopes stand and the submission succeeds
/// with the rest listed in [`Submission::not_enqueued`]; if nothing was
/// published the broker error is returned.
#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
    tracker: StatusTracker,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>, tracker: StatusTracker) -> Self {
        Self { broker, tracker }
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    pub async fn declare_lanes(&self) -> Result<(), ProducerError> {
        for lane in Lane::all() {
            self.broker.declare_lane(&lane).await?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(kind = %kind, submitted_by = %submitted_by))]
    pub async fn submit(
        &self,
        kind: JobKind,
        raw: &SubmitParams,
        submitted_by: &PrincipalId,
    ) -> Result<Submission, ProducerError> {
        let parameters = JobParameters::resolve(kind, raw);
        let lane = Lane::for_kind(kind);

        self.broker.declare_lane(&lane).await?;

        let batch = build_envelopes(kind, &parameters, submitted_by)
            .into_iter()
            .map(|(envelope, queued_message)| {
                let payload = envelope
                    .encode()
                    .map_err(|e| ProducerError::Internal(e.to_string()))?;
                let message =
                    OutboundMessage::persistent(payload).with_priority(envelope.priority());
                Ok((envelope.task_id(), message, queued_message))
            })
            .collect::<Result<Vec<_>, ProducerError>>()?;

        let mut task_ids = Vec::with_capacity(batch.len());
        let mut not_enqueued = Vec::new();
        let mut publish_error = None;
        for (task_id, message, queued_message) in batch {
            if let Some(err) = &publish_error {
                self.record_unpublished(task_id, err).await;
                not_enqueued.push(task_id);
                continue;
            }

            self.tracker
                .record(task_id, StatusRecord::queued(queued_message))
                .await;
            let priority = message.priority;
            match self.broker.publish(&lane, message).await {
                Ok(()) => {
                    info!(task_id = %task_id, lane = %lane, priority = ?priority, "job enqueued");
                    task_ids.push(task_id);
                }
                Err(err) => {
                    error!(task_id = %task_id, lane = %lane, error = %err, "publish failed");
                    self.record_unpublished(task_id, &err).await;
                    not_enqueued.push(task_id);
                    publish_error = Some(err);
                }
            }
        }

        if let Some(err) = publish_error {
            if task_ids.is_empty() {
                return Err(err.into());
            }
            warn!(
                lane = %lane,
                enqueued = task_ids.len(),
                not_enqueued = not_enqueued.len(),
                "batch partially enqueued"
            );
        }

        Ok(Submission {
            kind,
            lane,
            parameters,
            task_ids,
            not_enqueued,
        })
    }

    async fn record_unpublished(&self, task_id: TaskId, err: &BrokerError) {
        self.tracker
            .record(task_id, StatusRecord::failed(format!("Could not enqueue task: {err}")))
            .await;
    }
}

fn build_envelopes(
    kind: JobKind,
    parameters: &JobParameters,
    submitted_by: &PrincipalId,
) -> Vec<(JobEnvelope, String)> {
    let single = |spec: JobSpec, message: String| {
        vec![(
            JobEnvelope::new(TaskId::new(), spec, submitted_by.clone()),
            message,
        )]
    };

    match kind {
        JobKind::Book => single(
            JobSpec::Book {
                count: parameters.count,
            },
            format!("Task queued for generating {} books", parameters.count),
        ),
        JobKind::Image => single(
            JobSpec::Image {
                count: parameters.count,
            },
            format!("Task queued for generating {} images", parameters.count),
        ),
        JobKind::LargeBook => (0..parameters.count)
            .map(|i| {
                let book_number = i + 1;
                let spec = JobSpec::LargeBook {
                    book_number,
                    word_count: parameters.word_count,
                };
                let envelope = JobEnvelope::new(TaskId::new(), spec, submitted_by.clone())
                    .with_priority(Priority::for_batch_position(i));
                (
                    envelope,
                    format!(
                        "Large book {book_number} queued ({} words)",
                        parameters.word_count
                    ),
                )
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::InMemoryStatusStore;
    use bookforge_core::JobStatus;
    use bookforge_events::InMemoryBroker;
    use std::collections::HashSet;

    fn producer() -> (Arc<InMemoryBroker>, StatusTracker, Producer) {
        let broker = Arc::new(InMemoryBroker::new());
        let tracker = StatusTracker::new(Arc::new(InMemoryStatusStore::new()));
        let producer = Producer::new(broker.clone(), tracker.clone());
        (broker, tracker, producer)
    }

    #[tokio::test]
    async fn book_submission_is_one_queued_envelope() {
        let (broker, tracker, producer) = producer();
        let submission = producer
            .submit(JobKind::Book, &SubmitParams::new(Some(3), None), &PrincipalId::unknown())
            .await
            .unwrap();

        assert_eq!(submission.task_ids.len(), 1);
        assert_eq!(broker.depth(&Lane::for_kind(JobKind::Book)), 1);

        let record = tracker.get(submission.task_ids[0]).await.unwrap().unwrap();
        assert_eq!(record.status(), JobStatus::Queued);
        assert_eq!(record.progress(), 0);
    }

    #[tokio::test]
    async fn large_book_batch_prioritises_the_first_two() {
        let (broker, _, producer) = producer();
        let lane = Lane::for_kind(JobKind::LargeBook);
        let submission = producer
            .submit(
                JobKind::LargeBook,
                &SubmitParams::new(Some(4), Some(1_000)),
                &PrincipalId::new("alice"),
            )
            .await
            .unwrap();
        assert_eq!(submission.task_ids.len(), 4);

        let mut seen = Vec::new();
        while let Some(delivery) = broker.fetch(&lane, "t").await.unwrap() {
            let envelope = JobEnvelope::decode(delivery.payload()).unwrap();
            seen.push((envelope.priority(), envelope.spec().clone()));
            broker.ack(&delivery).await.unwrap();
        }

        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].0, Priority::High);
        assert_eq!(seen[1].0, Priority::High);
        assert_eq!(
            seen[2].1,
            JobSpec::LargeBook {
                book_number: 3,
                word_count: 1_000
            }
        );
    }

    #[tokio::test]
    async fn task_ids_are_unique_across_submissions() {
        let (_, _, producer) = producer();
        let mut ids = HashSet::new();
        for _ in 0..20 {
            for kind in JobKind::ALL {
                let submission = producer
                    .submit(kind, &SubmitParams::default(), &PrincipalId::unknown())
                    .await
                    .unwrap();
                for id in submission.task_ids {
                    assert!(ids.insert(id), "duplicate task id {id}");
                }
            }
        }
    }

    #[tokio::test]
    async fn broker_down_is_unavailable_and_leaves_no_record() {
        let (broker, tracker, producer) = producer();
        broker.set_available(false);

        let err = producer
            .submit(JobKind::Book, &SubmitParams::default(), &PrincipalId::unknown())
            .await
            .unwrap_err();

        assert!(matches!(err, ProducerError::Unavailable(_)));
        assert_eq!(tracker.report().await.unwrap().total_tasks, 0);
    }

    /// Accepts `remaining` publishes, then reports the broker as down.
    struct FailingAfter {
        inner: InMemoryBroker,
        remaining: std::sync::atomic::AtomicUsize,
    }

    impl FailingAfter {
        fn new(publishes: usize) -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryBroker::new(),
                remaining: std::sync::atomic::AtomicUsize::new(publishes),
            })
        }
    }

    #[async_trait::async_trait]
    impl Broker for FailingAfter {
        async fn declare_lane(&self, lane: &Lane) -> Result<(), BrokerError> {
            self.inner.declare_lane(lane).await
        }

        async fn publish(&self, lane: &Lane, message: OutboundMessage) -> Result<(), BrokerError> {
            use std::sync::atomic::Ordering;
            if self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                return Err(BrokerError::Unavailable("connection reset".into()));
            }
            self.inner.publish(lane, message).await
        }

        async fn fetch(
            &self,
            lane: &Lane,
            consumer: &str,
        ) -> Result<Option<bookforge_events::Delivery>, BrokerError> {
            self.inner.fetch(lane, consumer).await
        }

        async fn ack(&self, delivery: &bookforge_events::Delivery) -> Result<(), BrokerError> {
            self.inner.ack(delivery).await
        }

        async fn nack(
            &self,
            delivery: &bookforge_events::Delivery,
            requeue: bool,
        ) -> Result<(), BrokerError> {
            self.inner.nack(delivery, requeue).await
        }
    }

    #[tokio::test]
    async fn broken_batch_reports_published_and_failed_tasks() {
        let broker = FailingAfter::new(2);
        let tracker = StatusTracker::new(Arc::new(InMemoryStatusStore::new()));
        let producer = Producer::new(broker.clone(), tracker.clone());

        let submission = producer
            .submit(
                JobKind::LargeBook,
                &SubmitParams::new(Some(4), Some(500)),
                &PrincipalId::unknown(),
            )
            .await
            .unwrap();

        assert_eq!(submission.task_ids.len(), 2);
        assert_eq!(submission.not_enqueued.len(), 2);
        assert_eq!(broker.inner.depth(&Lane::for_kind(JobKind::LargeBook)), 2);
        for id in &submission.task_ids {
            let record = tracker.get(*id).await.unwrap().unwrap();
            assert_eq!(record.status(), JobStatus::Queued);
        }
        for id in &submission.not_enqueued {
            let record = tracker.get(*id).await.unwrap().unwrap();
            assert_eq!(record.status(), JobStatus::Failed);
            assert!(record.message().starts_with("Could not enqueue task"));
        }
    }

    #[tokio::test]
    async fn batch_failing_on_first_publish_is_unavailable() {
        let broker = FailingAfter::new(0);
        let tracker = StatusTracker::new(Arc::new(InMemoryStatusStore::new()));
        let producer = Producer::new(broker.clone(), tracker.clone());

        let err = producer
            .submit(
                JobKind::LargeBook,
                &SubmitParams::new(Some(3), Some(500)),
                &PrincipalId::unknown(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProducerError::Unavailable(_)));
        let report = tracker.report().await.unwrap();
        assert_eq!(report.total_tasks, 3);
        assert_eq!(report.failed_tasks.len(), 3);
    }
}
