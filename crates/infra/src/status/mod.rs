//! Status store adapter: a thin contract over a TTL-capable key/value store.
//!
//! The raw [`StatusStore`] only knows strings; [`StatusTracker`] layers the
//! typed [`StatusRecord`](bookforge_core::StatusRecord) on top and owns the
//! best-effort write policy.

mod in_memory;
#[cfg(feature = "redis")]
mod redis_store;
mod tracker;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use in_memory::InMemoryStatusStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStatusStore;
pub use tracker::StatusTracker;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatusStoreError {
    #[error("status store unavailable: {0}")]
    Unavailable(String),

    #[error("status store command failed: {0}")]
    Command(String),

    #[error("corrupt status record at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Write `value` under `key`, (re)starting its time-to-live.
    async fn set_with_expiry(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StatusStoreError>;

    /// Read a live value; expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StatusStoreError>;

    /// All live keys starting with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StatusStoreError>;
}
