//! HTTP client for the bookforge API, plus a [`StatusSource`] over it so the
//! progress monitor can watch tasks from outside the cluster.
//!
//! [`StatusSource`]: bookforge_infra::StatusSource

mod client;
mod error;

pub use client::{ApiClient, SubmitReceipt};
pub use error::ClientError;
