//! Worker runtime: one sequential consumer across all lanes.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bookforge_core::{JobEnvelope, JobStatus, StatusRecord};
use bookforge_events::{Broker, BrokerError, Delivery, Lane, OutboundMessage};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatch::JobDispatcher;
use super::types::{DeadLetterEntry, DeliveryOutcome, RetryPolicy};
use crate::blob::BlobStore;
use crate::config::PipelineConfig;
use crate::render::Renderer;
use crate::status::StatusTracker;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("broker unavailable after {attempts} attempts: {last_error}")]
    BrokerUnavailable { attempts: u32, last_error: String },

    #[error("worker task failed: {0}")]
    Join(String),
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer name (unique per worker process)
    pub name: String,
    pub lanes: Vec<Lane>,
    /// Sleep between empty fetches
    pub poll_interval: Duration,
    /// Fixed pause between reconnect attempts
    pub reconnect_backoff: Duration,
    /// Connection attempts at startup before giving up
    pub connect_attempts: u32,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            lanes: Lane::all(),
            poll_interval: Duration::from_millis(100),
            reconnect_backoff: Duration::from_secs(5),
            connect_attempts: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            name: config.worker_name.clone(),
            lanes: Lane::all(),
            poll_interval: config.poll_interval,
            reconnect_backoff: config.reconnect_backoff,
            connect_attempts: config.connect_attempts,
            retry: RetryPolicy::fixed(config.max_deliveries, config.requeue_delay),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_lanes(mut self, lanes: Vec<Lane>) -> Self {
        self.lanes = lanes;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub deliveries: u64,
    pub completed: u64,
    pub skipped: u64,
    pub requeued: u64,
    pub rejected: u64,
    pub dead_lettered: u64,
    pub reconnects: u64,
    pub uptime_secs: u64,
}

/// Handle to a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<Result<(), WorkerError>>,
    stats: Arc<Mutex<WorkerStats>>,
    started: Instant,
}

impl WorkerHandle {
    /// Stop fetching, let in-flight jobs finish, and wait for the consumer to stop.
    pub async fn shutdown(self) -> Result<(), WorkerError> {
        self.cancel.cancel();
        self.join
            .await
            .map_err(|e| WorkerError::Join(e.to_string()))?
    }

    pub fn stats(&self) -> WorkerStats {
        let mut stats = self.stats.lock().map(|s| s.clone()).unwrap_or_default();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Pulls envelopes, executes them, and settles deliveries.
///
/// Per job: `started` → dispatcher milestones → `completed` + ack, or
/// `failed` + requeue (dead-letter once the retry policy is exhausted).
/// Undecodable payloads are dropped. Status writes are best-effort.
pub struct WorkerRuntime {
    broker: Arc<dyn Broker>,
    tracker: StatusTracker,
    dispatcher: JobDispatcher,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerRuntime {
    pub fn new(
        broker: Arc<dyn Broker>,
        tracker: StatusTracker,
        blobs: Arc<dyn BlobStore>,
        renderer: Arc<dyn Renderer>,
        config: WorkerConfig,
    ) -> Self {
        let dispatcher = JobDispatcher::new(tracker.clone(), blobs, renderer);
        Self {
            broker,
            tracker,
            dispatcher,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn bump(&self, f: impl FnOnce(&mut WorkerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    /// Declare every consumed lane and its dead-letter lane. Idempotent.
    pub async fn declare_lanes(&self) -> Result<(), BrokerError> {
        for lane in &self.config.lanes {
            self.broker.declare_lane(lane).await?;
            self.broker.declare_lane(&lane.dead_letter()).await?;
        }
        Ok(())
    }

    /// Declare lanes, retrying up to `connect_attempts` times.
    pub async fn connect(&self, shutdown: &CancellationToken) -> Result<(), WorkerError> {
        let attempts = self.config.connect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.declare_lanes().await {
                Ok(()) => {
                    info!(worker = %self.config.name, attempt, "lanes declared");
                    return Ok(());
                }
                Err(err) => {
                    warn!(worker = %self.config.name, attempt, error = %err, "broker connection failed");
                    last_error = err.to_string();
                }
            }
            if attempt < attempts {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.reconnect_backoff) => {
                        if let Err(err) = self.broker.reconnect().await {
                            debug!(error = %err, "reconnect attempt failed");
                        }
                    }
                }
            }
        }

        Err(WorkerError::BrokerUnavailable {
            attempts,
            last_error,
        })
    }

    /// Spawn on the current runtime.
    pub fn spawn(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let stats = Arc::clone(&self.stats);
        let runtime = Arc::new(self);
        let join = tokio::spawn(runtime.run(cancel.clone()));
        WorkerHandle {
            cancel,
            join,
            stats,
            started: Instant::now(),
        }
    }

    /// Connect, then consume every lane until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), WorkerError> {
        self.connect(&shutdown).await?;
        info!(worker = %self.config.name, lanes = self.config.lanes.len(), "worker started");

        let consumer = tokio::spawn(Arc::clone(&self).consume(shutdown.clone()));
        let result = consumer.await.map_err(|err| {
            error!(worker = %self.config.name, error = %err, "consumer task failed");
            shutdown.cancel();
            WorkerError::Join(err.to_string())
        });

        self.broker.close().await;
        info!(worker = %self.config.name, "worker stopped");
        result
    }

    /// Single consume loop over all lanes: one delivery in flight per worker.
    ///
    /// Lanes are polled round-robin starting after the last one served; a
    /// delivery is processed and settled before anything else is fetched.
    async fn consume(self: Arc<Self>, shutdown: CancellationToken) {
        let lanes = self.config.lanes.clone();
        if lanes.is_empty() {
            warn!(worker = %self.config.name, "no lanes configured");
            return;
        }
        let mut cursor = 0;

        while !shutdown.is_cancelled() {
            let mut served = false;

            for offset in 0..lanes.len() {
                let index = (cursor + offset) % lanes.len();
                let lane = &lanes[index];
                match self.broker.fetch(lane, &self.config.name).await {
                    Ok(Some(delivery)) => {
                        self.bump(|s| s.deliveries += 1);
                        let outcome = self.process(&delivery).await;
                        if let Err(err) = self.settle(&delivery, outcome, &shutdown).await {
                            warn!(lane = %lane, error = %err, "settling delivery failed");
                            if err.is_connection() {
                                self.recover(&shutdown).await;
                            }
                        }
                        cursor = (index + 1) % lanes.len();
                        served = true;
                        break;
                    }
                    Ok(None) => {}
                    Err(err) if err.is_connection() => {
                        warn!(lane = %lane, error = %err, "lost broker connection");
                        self.recover(&shutdown).await;
                        served = true;
                        break;
                    }
                    Err(err) => error!(lane = %lane, error = %err, "fetch failed"),
                }
            }

            if !served {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        debug!(worker = %self.config.name, "consumer stopped");
    }

    /// Reconnect with a fixed back-off and redeclare lanes; gives up only on shutdown.
    async fn recover(&self, shutdown: &CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.config.reconnect_backoff) => {}
            }
            let restored = match self.broker.reconnect().await {
                Ok(()) => self.declare_lanes().await,
                Err(err) => Err(err),
            };
            match restored {
                Ok(()) => {
                    self.bump(|s| s.reconnects += 1);
                    info!(worker = %self.config.name, "broker connection restored");
                    return;
                }
                Err(err) => warn!(worker = %self.config.name, error = %err, "reconnect failed"),
            }
        }
    }

    /// Run one delivery through the job state machine and decide how to settle it.
    pub async fn process(&self, delivery: &Delivery) -> DeliveryOutcome {
        let envelope = match JobEnvelope::decode(delivery.payload()) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(lane = %delivery.lane(), error = %err, "dropping undecodable envelope");
                return DeliveryOutcome::Rejected {
                    reason: err.to_string(),
                };
            }
        };
        let task_id = envelope.task_id();

        if let Ok(Some(record)) = self.tracker.get(task_id).await {
            if record.status() == JobStatus::Completed {
                info!(task_id = %task_id, "already completed; skipping redelivery");
                return DeliveryOutcome::AlreadyCompleted;
            }
        }

        info!(
            task_id = %task_id,
            kind = %envelope.kind(),
            attempt = delivery.attempt(),
            "job started"
        );
        self.tracker
            .record(task_id, StatusRecord::started(format!("Started {} job", envelope.kind())))
            .await;

        match self.dispatcher.execute(&envelope).await {
            Ok(message) => {
                self.tracker.record(task_id, StatusRecord::completed(message)).await;
                info!(task_id = %task_id, kind = %envelope.kind(), "job completed");
                DeliveryOutcome::Completed
            }
            Err(err) => {
                let attempt = delivery.attempt();
                let retry = &self.config.retry;
                let outcome = if retry.should_requeue(attempt) {
                    DeliveryOutcome::Requeue {
                        error: err.to_string(),
                        after: retry.delay_for_attempt(attempt),
                    }
                } else {
                    DeliveryOutcome::DeadLetter {
                        error: err.to_string(),
                    }
                };
                let message = match &outcome {
                    DeliveryOutcome::DeadLetter { .. } => {
                        format!("Error: {err} (gave up after {attempt} attempts)")
                    }
                    _ => format!("Error: {err}"),
                };
                self.tracker.record(task_id, StatusRecord::failed(message)).await;
                warn!(task_id = %task_id, attempt, error = %err, outcome = ?outcome, "job failed");
                outcome
            }
        }
    }

    async fn settle(
        &self,
        delivery: &Delivery,
        outcome: DeliveryOutcome,
        shutdown: &CancellationToken,
    ) -> Result<(), BrokerError> {
        match outcome {
            DeliveryOutcome::Completed => {
                self.broker.ack(delivery).await?;
                self.bump(|s| s.completed += 1);
            }
            DeliveryOutcome::AlreadyCompleted => {
                self.broker.ack(delivery).await?;
                self.bump(|s| s.skipped += 1);
            }
            DeliveryOutcome::Rejected { .. } => {
                self.broker.nack(delivery, false).await?;
                self.bump(|s| s.rejected += 1);
            }
            DeliveryOutcome::Requeue { after, .. } => {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(after) => {}
                }
                self.broker.nack(delivery, true).await?;
                self.bump(|s| s.requeued += 1);
            }
            DeliveryOutcome::DeadLetter { error } => {
                let dead_letter = delivery.lane().dead_letter();
                let entry = DeadLetterEntry::new(
                    delivery.lane().name(),
                    delivery.payload(),
                    error,
                    delivery.attempt(),
                );
                let published = match serde_json::to_vec(&entry) {
                    Ok(payload) => {
                        self.broker
                            .publish(&dead_letter, OutboundMessage::persistent(payload))
                            .await
                    }
                    Err(err) => Err(BrokerError::Encode(err.to_string())),
                };
                match published {
                    Ok(()) => {
                        self.broker.ack(delivery).await?;
                        self.bump(|s| s.dead_lettered += 1);
                        warn!(lane = %dead_letter, attempts = delivery.attempt(), "envelope dead-lettered");
                    }
                    Err(err) => {
                        warn!(lane = %dead_letter, error = %err, "dead-letter publish failed; requeueing");
                        self.broker.nack(delivery, true).await?;
                        self.bump(|s| s.requeued += 1);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use bookforge_core::{JobKind, JobSpec, PrincipalId, TaskId};
    use bookforge_events::InMemoryBroker;

    use crate::blob::InMemoryBlobStore;
    use crate::render::{BookRequest, ImageRequest, ProgressReporter, RenderError};
    use crate::status::InMemoryStatusStore;

    /// Fails the first `failures` renders, then succeeds.
    struct FlakyRenderer {
        failures: AtomicU32,
    }

    impl FlakyRenderer {
        fn failing(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(failures),
            })
        }

        fn attempt(&self) -> Result<Vec<u8>, RenderError> {
            match self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            {
                Ok(_) => Err(RenderError::Failed("renderer exploded".into())),
                Err(_) => Ok(b"rendered".to_vec()),
            }
        }
    }

    impl Renderer for FlakyRenderer {
        fn render_book(&self, _: &BookRequest) -> Result<Vec<u8>, RenderError> {
            self.attempt()
        }

        fn render_large_book(
            &self,
            _: &BookRequest,
            progress: &ProgressReporter,
        ) -> Result<Vec<u8>, RenderError> {
            progress.report(50, "halfway");
            self.attempt()
        }

        fn render_image(&self, _: &ImageRequest) -> Result<Vec<u8>, RenderError> {
            self.attempt()
        }
    }

    /// Renders slowly and records how many renders overlap.
    #[derive(Default)]
    struct SlowRenderer {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowRenderer {
        fn render(&self) -> Result<Vec<u8>, RenderError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(60));
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(b"slow".to_vec())
        }
    }

    impl Renderer for SlowRenderer {
        fn render_book(&self, _: &BookRequest) -> Result<Vec<u8>, RenderError> {
            self.render()
        }

        fn render_large_book(
            &self,
            _: &BookRequest,
            _: &ProgressReporter,
        ) -> Result<Vec<u8>, RenderError> {
            self.render()
        }

        fn render_image(&self, _: &ImageRequest) -> Result<Vec<u8>, RenderError> {
            self.render()
        }
    }

    struct Fixture {
        broker: Arc<InMemoryBroker>,
        status: Arc<InMemoryStatusStore>,
        blobs: Arc<InMemoryBlobStore>,
        tracker: StatusTracker,
    }

    impl Fixture {
        fn new() -> Self {
            let status = Arc::new(InMemoryStatusStore::new());
            Self {
                broker: Arc::new(InMemoryBroker::new()),
                tracker: StatusTracker::new(status.clone()),
                status,
                blobs: Arc::new(InMemoryBlobStore::new()),
            }
        }

        fn runtime(&self, renderer: Arc<dyn Renderer>, retry: RetryPolicy) -> WorkerRuntime {
            let config = WorkerConfig::default()
                .with_name("test-worker")
                .with_poll_interval(Duration::from_millis(5))
                .with_reconnect_backoff(Duration::from_millis(10))
                .with_retry(retry);
            WorkerRuntime::new(
                self.broker.clone(),
                self.tracker.clone(),
                self.blobs.clone(),
                renderer,
                config,
            )
        }

        async fn publish(&self, envelope: &JobEnvelope) {
            let lane = Lane::for_kind(envelope.kind());
            self.broker.declare_lane(&lane).await.unwrap();
            self.broker
                .publish(&lane, OutboundMessage::persistent(envelope.encode().unwrap()))
                .await
                .unwrap();
        }
    }

    fn book_envelope(count: u32) -> JobEnvelope {
        JobEnvelope::new(TaskId::new(), JobSpec::Book { count }, PrincipalId::unknown())
    }

    fn no_delay(max_deliveries: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_deliveries, Duration::ZERO)
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !check() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn successful_job_completes_and_acks() {
        let fx = Fixture::new();
        let envelope = book_envelope(3);
        fx.publish(&envelope).await;

        let handle = fx
            .runtime(FlakyRenderer::failing(0), no_delay(5))
            .spawn();
        wait_until(|| handle.stats().completed == 1).await;
        handle.shutdown().await.unwrap();

        let record = fx.tracker.get(envelope.task_id()).await.unwrap().unwrap();
        assert_eq!(record.status(), JobStatus::Completed);
        assert_eq!(record.progress(), 100);
        assert_eq!(fx.blobs.len(), 3);
        let lane = Lane::for_kind(JobKind::Book);
        assert_eq!(fx.broker.depth(&lane) + fx.broker.in_flight(&lane), 0);
    }

    #[tokio::test]
    async fn failure_records_failed_then_redelivery_succeeds() {
        let fx = Fixture::new();
        let runtime = fx.runtime(FlakyRenderer::failing(1), no_delay(5));
        runtime.declare_lanes().await.unwrap();
        let envelope = book_envelope(1);
        fx.publish(&envelope).await;
        let lane = Lane::for_kind(JobKind::Book);
        let token = CancellationToken::new();

        let first = fx.broker.fetch(&lane, "w").await.unwrap().unwrap();
        let outcome = runtime.process(&first).await;
        assert!(matches!(outcome, DeliveryOutcome::Requeue { .. }));

        let failed = fx.tracker.get(envelope.task_id()).await.unwrap().unwrap();
        assert_eq!(failed.status(), JobStatus::Failed);
        assert_eq!(failed.progress(), 0);
        assert!(failed.message().contains("renderer exploded"));

        runtime.settle(&first, outcome, &token).await.unwrap();
        let second = fx.broker.fetch(&lane, "w").await.unwrap().unwrap();
        assert_eq!(second.attempt(), 2);
        assert_eq!(runtime.process(&second).await, DeliveryOutcome::Completed);

        let done = fx.tracker.get(envelope.task_id()).await.unwrap().unwrap();
        assert_eq!(done.status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn poison_message_is_dropped_once() {
        let fx = Fixture::new();
        let lane = Lane::for_kind(JobKind::Image);
        fx.broker.declare_lane(&lane).await.unwrap();
        fx.broker
            .publish(&lane, OutboundMessage::persistent(b"{\"kind\":".to_vec()))
            .await
            .unwrap();

        let handle = fx
            .runtime(FlakyRenderer::failing(0), no_delay(5))
            .spawn();
        wait_until(|| handle.stats().rejected == 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let stats = handle.stats();
        handle.shutdown().await.unwrap();

        assert_eq!(stats.deliveries, 1);
        assert_eq!(fx.broker.depth(&lane), 0);
        assert!(fx.status.is_empty());
    }

    #[tokio::test]
    async fn exhausted_envelope_goes_to_dead_letter_lane() {
        let fx = Fixture::new();
        let envelope = book_envelope(1);
        fx.publish(&envelope).await;
        let lane = Lane::for_kind(JobKind::Book);

        let handle = fx
            .runtime(FlakyRenderer::failing(u32::MAX), no_delay(2))
            .spawn();
        wait_until(|| handle.stats().dead_lettered == 1).await;
        let stats = handle.stats();
        handle.shutdown().await.unwrap();

        assert_eq!(stats.requeued, 1);
        assert_eq!(fx.broker.depth(&lane.dead_letter()), 1);
        assert_eq!(fx.broker.depth(&lane), 0);

        let record = fx.tracker.get(envelope.task_id()).await.unwrap().unwrap();
        assert_eq!(record.status(), JobStatus::Failed);
        assert!(record.message().contains("gave up after 2 attempts"));
    }

    #[tokio::test]
    async fn redelivered_envelope_leaves_a_single_set_of_blobs() {
        let fx = Fixture::new();
        let envelope = book_envelope(3);
        fx.publish(&envelope).await;
        fx.publish(&envelope).await;

        let handle = fx
            .runtime(FlakyRenderer::failing(0), no_delay(5))
            .spawn();
        wait_until(|| {
            let s = handle.stats();
            s.completed + s.skipped == 2
        })
        .await;
        let stats = handle.stats();
        handle.shutdown().await.unwrap();

        assert_eq!(stats.completed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(fx.blobs.len(), 3);
        let record = fx.tracker.get(envelope.task_id()).await.unwrap().unwrap();
        assert_eq!(record.progress(), 100);
    }

    #[tokio::test]
    async fn rerunning_without_a_status_record_overwrites_blobs() {
        let fx = Fixture::new();
        let runtime = fx.runtime(FlakyRenderer::failing(0), no_delay(5));
        let envelope = book_envelope(2);
        let lane = Lane::for_kind(JobKind::Book);
        let delivery = Delivery::new(
            lane,
            "replay",
            envelope.encode().unwrap(),
            Default::default(),
            1,
        );

        fx.status.set_available(false);
        assert_eq!(runtime.process(&delivery).await, DeliveryOutcome::Completed);
        assert_eq!(runtime.process(&delivery).await, DeliveryOutcome::Completed);
        assert_eq!(fx.blobs.len(), 2);
    }

    #[tokio::test]
    async fn status_store_outage_does_not_abort_jobs() {
        let fx = Fixture::new();
        let envelope = book_envelope(2);
        fx.publish(&envelope).await;
        fx.status.set_available(false);

        let handle = fx
            .runtime(FlakyRenderer::failing(0), no_delay(5))
            .spawn();
        wait_until(|| handle.stats().completed == 1).await;
        handle.shutdown().await.unwrap();

        assert_eq!(fx.blobs.len(), 2);
    }

    #[tokio::test]
    async fn reconnects_after_broker_outage() {
        let fx = Fixture::new();
        let handle = fx
            .runtime(FlakyRenderer::failing(0), no_delay(5))
            .spawn();
        wait_until(|| fx.broker.is_declared(&Lane::for_kind(JobKind::Image))).await;

        fx.broker.set_available(false);
        tokio::time::sleep(Duration::from_millis(30)).await;
        fx.broker.set_available(true);

        let envelope =
            JobEnvelope::new(TaskId::new(), JobSpec::Image { count: 1 }, PrincipalId::unknown());
        fx.publish(&envelope).await;
        wait_until(|| handle.stats().completed == 1).await;
        let stats = handle.stats();
        handle.shutdown().await.unwrap();

        assert!(stats.reconnects >= 1);
    }

    #[tokio::test]
    async fn startup_gives_up_after_bounded_attempts() {
        let fx = Fixture::new();
        fx.broker.set_available(false);
        let mut runtime = fx.runtime(FlakyRenderer::failing(0), no_delay(5));
        runtime.config.connect_attempts = 2;

        let err = runtime.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, WorkerError::BrokerUnavailable { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn large_book_progress_is_persisted_between_milestones() {
        let fx = Fixture::new();
        let runtime = fx.runtime(FlakyRenderer::failing(0), no_delay(5));
        let envelope = JobEnvelope::new(
            TaskId::new(),
            JobSpec::LargeBook {
                book_number: 1,
                word_count: 100,
            },
            PrincipalId::new("alice"),
        );
        let delivery = Delivery::new(
            Lane::for_kind(JobKind::LargeBook),
            "t",
            envelope.encode().unwrap(),
            Default::default(),
            1,
        );

        assert_eq!(runtime.process(&delivery).await, DeliveryOutcome::Completed);
        let head = fx
            .blobs
            .head(&crate::jobs::dispatch::large_book_key(envelope.task_id()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.metadata.get("user_id"), Some("alice"));
    }

    #[tokio::test]
    async fn one_worker_renders_one_job_at_a_time_across_lanes() {
        let fx = Fixture::new();
        fx.publish(&book_envelope(1)).await;
        fx.publish(&JobEnvelope::new(
            TaskId::new(),
            JobSpec::Image { count: 1 },
            PrincipalId::unknown(),
        ))
        .await;
        fx.publish(&JobEnvelope::new(
            TaskId::new(),
            JobSpec::LargeBook {
                book_number: 1,
                word_count: 10,
            },
            PrincipalId::unknown(),
        ))
        .await;

        let renderer = Arc::new(SlowRenderer::default());
        let handle = fx.runtime(renderer.clone(), no_delay(5)).spawn();
        wait_until(|| handle.stats().completed == 3).await;
        handle.shutdown().await.unwrap();

        assert_eq!(renderer.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_parameters_are_rejected_without_rendering() {
        let fx = Fixture::new();
        let runtime = fx.runtime(FlakyRenderer::failing(0), no_delay(5));
        let raw = br#"{"task_id":"0190a5b0-0000-7000-8000-000000000000","submitted_by":"x","submitted_at":"2024-01-01T00:00:00Z","spec":{"kind":"large_book","book_number":1,"word_count":4294967295}}"#;
        let delivery = Delivery::new(
            Lane::for_kind(JobKind::LargeBook),
            "huge",
            raw.to_vec(),
            Default::default(),
            1,
        );

        let outcome = runtime.process(&delivery).await;
        assert!(matches!(outcome, DeliveryOutcome::Rejected { .. }));
        assert!(fx.blobs.is_empty());
        assert!(fx.status.is_empty());
    }
}
