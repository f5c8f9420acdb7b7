//! Process configuration loaded from the environment.

use std::time::Duration;

use bookforge_core::status::STATUS_TTL;

/// Settings shared by the API, the worker binary and the in-process worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub redis_url: String,
    /// Redis broker/status store + filesystem blobs instead of in-memory adapters.
    pub use_persistent_stores: bool,
    pub blob_dir: String,
    pub bind_addr: String,
    pub status_ttl: Duration,
    pub worker_name: String,
    pub poll_interval: Duration,
    pub reconnect_backoff: Duration,
    pub connect_attempts: u32,
    pub max_deliveries: u32,
    pub requeue_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            use_persistent_stores: false,
            blob_dir: "./data/library".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            status_ttl: STATUS_TTL,
            worker_name: format!("worker-{}", uuid::Uuid::now_v7().simple()),
            poll_interval: Duration::from_millis(100),
            reconnect_backoff: Duration::from_secs(5),
            connect_attempts: 5,
            max_deliveries: 5,
            requeue_delay: Duration::from_millis(500),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparsable values keep their default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            use_persistent_stores: lookup("USE_PERSISTENT_STORES")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.use_persistent_stores),
            blob_dir: lookup("BLOB_DIR").unwrap_or(defaults.blob_dir),
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            status_ttl: parse_u64("STATUS_TTL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.status_ttl),
            worker_name: lookup("WORKER_NAME")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.worker_name),
            poll_interval: parse_u64("WORKER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            reconnect_backoff: parse_u64("BROKER_RECONNECT_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconnect_backoff),
            connect_attempts: parse_u64("BROKER_CONNECT_ATTEMPTS")
                .map(|n| n.clamp(1, u64::from(u32::MAX)) as u32)
                .unwrap_or(defaults.connect_attempts),
            max_deliveries: parse_u64("WORKER_MAX_DELIVERIES")
                .map(|n| n.clamp(1, u64::from(u32::MAX)) as u32)
                .unwrap_or(defaults.max_deliveries),
            requeue_delay: parse_u64("WORKER_REQUEUE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.requeue_delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = PipelineConfig::from_lookup(|_| None);
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert!(!config.use_persistent_stores);
        assert_eq!(config.status_ttl, Duration::from_secs(3600));
        assert_eq!(config.reconnect_backoff, Duration::from_secs(5));
        assert_eq!(config.connect_attempts, 5);
        assert!(config.worker_name.starts_with("worker-"));
    }

    #[test]
    fn environment_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("USE_PERSISTENT_STORES", "TRUE"),
            ("STATUS_TTL_SECS", "60"),
            ("WORKER_NAME", "w-1"),
            ("WORKER_MAX_DELIVERIES", "0"),
        ]));
        assert!(config.use_persistent_stores);
        assert_eq!(config.status_ttl, Duration::from_secs(60));
        assert_eq!(config.worker_name, "w-1");
        assert_eq!(config.max_deliveries, 1);
    }

    #[test]
    fn garbage_keeps_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("STATUS_TTL_SECS", "soon"),
            ("WORKER_POLL_INTERVAL_MS", "-5"),
        ]));
        assert_eq!(config.status_ttl, STATUS_TTL);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }
}
