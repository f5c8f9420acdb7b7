//! `bookforge-core`: shared vocabulary of the generation pipeline.
//!
//! This crate contains **pure** types (no I/O): task identifiers, job kinds
//! and their parameters, the envelope placed on a lane, and the status record
//! observed by clients.

pub mod envelope;
pub mod error;
pub mod id;
pub mod job;
pub mod report;
pub mod status;

pub use envelope::JobEnvelope;
pub use error::{DomainError, DomainResult};
pub use id::{PrincipalId, TaskId};
pub use job::{JobKind, JobParameters, JobSpec, Priority, SubmitParams};
pub use report::{StatusReport, TaskSummary};
pub use status::{JobStatus, StatusRecord};
