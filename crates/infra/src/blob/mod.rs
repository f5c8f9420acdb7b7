//! Blob store: named objects with ASCII string metadata.

mod fs;
mod in_memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fs::FsBlobStore;
pub use in_memory::InMemoryBlobStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// Metadata channels are ASCII-only.
    #[error("metadata {key} is not ASCII")]
    NonAsciiMetadata { key: String },

    #[error("blob store io error: {0}")]
    Io(String),

    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

/// ASCII-only object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobMetadata(BTreeMap<String, String>);

impl BlobMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pair, rejecting anything that is not ASCII.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), BlobError> {
        let key = key.into();
        let value = value.into();
        if !key.is_ascii() || !value.is_ascii() {
            return Err(BlobError::NonAsciiMetadata { key });
        }
        self.0.insert(key, value);
        Ok(())
    }

    /// Insert only if both halves are ASCII; returns whether it was kept.
    pub fn insert_if_ascii(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        self.insert(key, value).is_ok()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn validate(&self) -> Result<(), BlobError> {
        match self.0.iter().find(|(k, v)| !k.is_ascii() || !v.is_ascii()) {
            Some((key, _)) => Err(BlobError::NonAsciiMetadata { key: key.clone() }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObject {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub metadata: BlobMetadata,
}

impl PutObject {
    pub fn new(key: impl Into<String>, body: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            body,
            content_type: content_type.into(),
            metadata: BlobMetadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: BlobMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Everything about an object except its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHead {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub metadata: BlobMetadata,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store (or overwrite) an object. Writing the same key twice leaves one object.
    async fn put(&self, object: PutObject) -> Result<ObjectHead, BlobError>;

    async fn get(&self, key: &str) -> Result<Option<(ObjectHead, Vec<u8>)>, BlobError>;

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, BlobError>;

    /// Objects whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectHead>, BlobError>;
}

/// Object keys are flat: non-empty ASCII, no path separators, no leading dot.
pub(crate) fn validate_key(key: &str) -> Result<(), BlobError> {
    let ok = !key.is_empty()
        && key.is_ascii()
        && !key.starts_with('.')
        && !key.contains(['/', '\\'])
        && !key.contains("..");
    if ok {
        Ok(())
    } else {
        Err(BlobError::InvalidKey(key.to_string()))
    }
}

pub(crate) fn validate_put(object: &PutObject) -> Result<(), BlobError> {
    validate_key(&object.key)?;
    object.metadata.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_rejects_non_ascii() {
        let mut meta = BlobMetadata::new();
        meta.insert("title", "Generated Book 1").unwrap();
        assert_eq!(
            meta.insert("description", "Livre généré"),
            Err(BlobError::NonAsciiMetadata {
                key: "description".into()
            })
        );
        assert!(!meta.insert_if_ascii("title_fr", "Écrit"));
        assert_eq!(meta.len(), 1);
    }

    #[test]
    fn keys_are_flat() {
        assert!(validate_key("book_abc_0.txt").is_ok());
        for bad in ["", "../etc/passwd", "a/b", ".hidden", "naïve.txt"] {
            assert!(validate_key(bad).is_err(), "{bad} should be rejected");
        }
    }
}
