use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

use super::{BlobError, BlobStore, ObjectHead, PutObject, validate_key, validate_put};

const META_DIR: &str = ".meta";

/// Filesystem blob store.
///
/// Bodies live at `<root>/<key>`, heads at `<root>/.meta/<key>.json`. Writes go
/// through a temporary file and a rename so a re-put replaces the object whole.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(META_DIR))
            .await
            .map_err(io_error)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn head_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{key}.json"))
    }
}

fn io_error(err: std::io::Error) -> BlobError {
    BlobError::Io(err.to_string())
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), BlobError> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::now_v7().simple()));
    tokio::fs::write(&tmp, bytes).await.map_err(io_error)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_error)
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, object: PutObject) -> Result<ObjectHead, BlobError> {
        validate_put(&object)?;
        let head = ObjectHead {
            key: object.key.clone(),
            size: object.body.len() as u64,
            content_type: object.content_type,
            metadata: object.metadata,
            last_modified: Utc::now(),
        };
        let head_json = serde_json::to_vec(&head).map_err(|e| BlobError::Io(e.to_string()))?;

        write_atomically(&self.body_path(&object.key), &object.body).await?;
        write_atomically(&self.head_path(&object.key), &head_json).await?;
        Ok(head)
    }

    async fn get(&self, key: &str) -> Result<Option<(ObjectHead, Vec<u8>)>, BlobError> {
        let Some(head) = self.head(key).await? else {
            return Ok(None);
        };
        match tokio::fs::read(self.body_path(key)).await {
            Ok(body) => Ok(Some((head, body))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(err)),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, BlobError> {
        validate_key(key)?;
        match tokio::fs::read(self.head_path(key)).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| BlobError::Io(format!("{key}: {e}"))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(err)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectHead>, BlobError> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(io_error)?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(prefix) && validate_key(&name).is_ok() && !name.contains(".tmp-") {
                keys.push(name);
            }
        }
        keys.sort();

        let mut heads = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(head) = self.head(&key).await? {
                heads.push(head);
            }
        }
        Ok(heads)
    }
}
