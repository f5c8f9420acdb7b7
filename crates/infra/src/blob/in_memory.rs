use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use super::{BlobError, BlobStore, ObjectHead, PutObject, validate_put};

/// In-memory blob store (tests/dev).
#[derive(Debug)]
pub struct InMemoryBlobStore {
    objects: RwLock<BTreeMap<String, (ObjectHead, Vec<u8>)>>,
    available: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable, writes fail (reads keep working).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

fn poisoned<T>(_: T) -> BlobError {
    BlobError::Io("lock poisoned".into())
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, object: PutObject) -> Result<ObjectHead, BlobError> {
        validate_put(&object)?;
        if !self.available.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("in-memory blob store is down".into()));
        }
        let head = ObjectHead {
            key: object.key.clone(),
            size: object.body.len() as u64,
            content_type: object.content_type,
            metadata: object.metadata,
            last_modified: Utc::now(),
        };
        self.objects
            .write()
            .map_err(poisoned)?
            .insert(object.key, (head.clone(), object.body));
        Ok(head)
    }

    async fn get(&self, key: &str) -> Result<Option<(ObjectHead, Vec<u8>)>, BlobError> {
        Ok(self.objects.read().map_err(poisoned)?.get(key).cloned())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, BlobError> {
        Ok(self
            .objects
            .read()
            .map_err(poisoned)?
            .get(key)
            .map(|(head, _)| head.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectHead>, BlobError> {
        Ok(self
            .objects
            .read()
            .map_err(poisoned)?
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, (head, _))| head.clone())
            .collect())
    }
}
