//! End-to-end runs over the in-memory adapters:
//! Producer → lane → WorkerRuntime → blobs + status → ProgressMonitor.

use std::sync::Arc;
use std::time::Duration;

use bookforge_core::{JobKind, JobStatus, PrincipalId, SubmitParams, TaskId};
use bookforge_events::Lane;

use crate::backends::InMemoryBackends;
use crate::blob::BlobStore;
use crate::jobs::{Producer, WorkerConfig, WorkerHandle, WorkerRuntime};
use crate::monitor::{MonitorOutcome, ProgressMonitor};
use crate::render::StandardRenderer;
use crate::status::StatusTracker;

struct Pipeline {
    memory: InMemoryBackends,
    tracker: StatusTracker,
    producer: Producer,
}

impl Pipeline {
    fn new() -> Self {
        let memory = InMemoryBackends::new();
        let backends = memory.backends();
        let tracker = backends.tracker(Duration::from_secs(3600));
        let producer = Producer::new(backends.broker.clone(), tracker.clone());
        Self {
            memory,
            tracker,
            producer,
        }
    }

    fn start_worker(&self) -> WorkerHandle {
        let backends = self.memory.backends();
        let config = WorkerConfig::default()
            .with_name("integration")
            .with_poll_interval(Duration::from_millis(5));
        WorkerRuntime::new(
            backends.broker,
            self.tracker.clone(),
            backends.blobs,
            Arc::new(StandardRenderer),
            config,
        )
        .spawn()
    }

    fn monitor(&self) -> ProgressMonitor {
        ProgressMonitor::new(Arc::new(self.tracker.clone()))
            .with_interval(Duration::from_millis(10))
            .with_timeout(Duration::from_secs(20))
    }

    async fn submit(&self, kind: JobKind, count: i64, word_count: Option<i64>) -> Vec<TaskId> {
        self.producer
            .submit(
                kind,
                &SubmitParams::new(Some(count), word_count),
                &PrincipalId::new("alice"),
            )
            .await
            .unwrap()
            .task_ids
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_kind_runs_to_completion() {
    let pipeline = Pipeline::new();
    let worker = pipeline.start_worker();

    let mut task_ids = pipeline.submit(JobKind::Book, 3, None).await;
    task_ids.extend(pipeline.submit(JobKind::Image, 2, None).await);
    task_ids.extend(pipeline.submit(JobKind::LargeBook, 2, Some(400)).await);
    assert_eq!(task_ids.len(), 4);

    let outcome = pipeline.monitor().poll(&task_ids).await;
    match outcome {
        MonitorOutcome::Finished(snapshot) => {
            assert_eq!(snapshot.completed, 4);
            assert_eq!(snapshot.progress, 100);
        }
        other => panic!("pipeline did not finish: {other:?}"),
    }

    let blobs = pipeline.memory.blobs.list("").await.unwrap();
    assert_eq!(blobs.len(), 3 + 2 + 2);
    assert!(blobs.iter().all(|head| head.metadata.get("task_id").is_some()));

    let report = pipeline.tracker.report().await.unwrap();
    assert_eq!(report.completed_tasks.len(), 4);
    assert!(report.active_tasks.is_empty());

    worker.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn jobs_wait_on_the_lane_until_a_worker_starts() {
    let pipeline = Pipeline::new();
    let task_ids = pipeline.submit(JobKind::Book, 1, None).await;

    let early = pipeline
        .monitor()
        .with_timeout(Duration::from_millis(60))
        .poll(&task_ids)
        .await;
    assert!(early.is_timed_out());
    assert_eq!(early.snapshot().pending, 1);
    assert_eq!(pipeline.memory.broker.depth(&Lane::for_kind(JobKind::Book)), 1);

    let worker = pipeline.start_worker();
    let late = pipeline.monitor().poll(&task_ids).await;
    assert!(matches!(late, MonitorOutcome::Finished(_)));

    let record = pipeline.tracker.get(task_ids[0]).await.unwrap().unwrap();
    assert_eq!(record.status(), JobStatus::Completed);
    assert_eq!(record.progress(), 100);

    worker.shutdown().await.unwrap();
}
