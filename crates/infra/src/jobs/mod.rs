//! The generation pipeline: submission, execution, redelivery.
//!
//! ## Design
//!
//! - One durable lane per job kind; envelopes are immutable once published
//! - Producers write a `queued` record, then publish
//! - A worker holds one delivery at a time across all its lanes (prefetch 1)
//! - Failures are recorded as `failed` and requeued (at-least-once); after
//!   `max_deliveries` the envelope moves to `<lane>.dlq`
//! - Undecodable envelopes are dropped, never requeued
//!
//! ## Components
//!
//! - `Producer`: envelope construction + initial status + publish
//! - `WorkerRuntime`: round-robin consume loop, reconnects, settling
//! - `JobDispatcher`: exhaustive per-kind execution (render, persist, progress)
//! - `RetryPolicy`: redelivery limit and requeue delay

pub mod dispatch;
pub mod producer;
pub mod types;
pub mod worker;

pub use dispatch::{JobDispatcher, JobError};
pub use producer::{Producer, ProducerError, Submission};
pub use types::{BackoffStrategy, DeadLetterEntry, DeliveryOutcome, RetryPolicy};
pub use worker::{WorkerConfig, WorkerError, WorkerHandle, WorkerRuntime, WorkerStats};
