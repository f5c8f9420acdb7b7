use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{StatusStore, StatusStoreError};

/// In-memory TTL map (tests/dev).
///
/// Expired entries are invisible to readers and purged lazily on write.
#[derive(Debug)]
pub struct InMemoryStatusStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    available: AtomicBool,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| entries.values().filter(|(_, exp)| *exp > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), StatusStoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StatusStoreError::Unavailable("in-memory status store is down".into()))
        }
    }
}

impl Default for InMemoryStatusStore {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

fn poisoned<T>(_: T) -> StatusStoreError {
    StatusStoreError::Command("lock poisoned".into())
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn set_with_expiry(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StatusStoreError> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StatusStoreError> {
        self.check()?;
        let now = Instant::now();
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StatusStoreError> {
        self.check()?;
        let now = Instant::now();
        let entries = self.entries.read().map_err(poisoned)?;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, (_, expires_at))| key.starts_with(prefix) && *expires_at > now)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_and_scan() {
        let store = InMemoryStatusStore::new();
        let ttl = Duration::from_secs(60);
        store.set_with_expiry("task_status:a", "1".into(), ttl).await.unwrap();
        store.set_with_expiry("task_status:b", "2".into(), ttl).await.unwrap();
        store.set_with_expiry("other:c", "3".into(), ttl).await.unwrap();

        assert_eq!(store.get("task_status:a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(
            store.scan("task_status:").await.unwrap(),
            vec!["task_status:a".to_string(), "task_status:b".to_string()]
        );
    }

    #[tokio::test]
    async fn entries_expire() {
        let store = InMemoryStatusStore::new();
        store
            .set_with_expiry("k", "v".into(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.scan("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rewrite_refreshes_ttl() {
        let store = InMemoryStatusStore::new();
        store
            .set_with_expiry("k", "old".into(), Duration::from_millis(10))
            .await
            .unwrap();
        store
            .set_with_expiry("k", "new".into(), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let store = InMemoryStatusStore::new();
        store.set_available(false);
        assert!(matches!(
            store.get("k").await,
            Err(StatusStoreError::Unavailable(_))
        ));
    }
}
