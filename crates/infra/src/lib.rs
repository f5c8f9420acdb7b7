//! Infrastructure for the generation pipeline: adapters, renderers, the
//! producer, the worker runtime and the progress monitor.

pub mod backends;
pub mod blob;
pub mod broker;
pub mod config;
pub mod jobs;
pub mod monitor;
#[cfg(feature = "redis")]
mod redis_conn;
pub mod render;
pub mod status;

#[cfg(test)]
mod integration_tests;

pub use backends::{Backends, BackendsError, InMemoryBackends};
pub use config::PipelineConfig;
pub use monitor::{MonitorOutcome, ProgressMonitor, ProgressSnapshot, StatusSource};
