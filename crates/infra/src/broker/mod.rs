//! Broker adapters beyond the in-memory one shipped with `bookforge-events`.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsBroker;
