//! Output object storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StorageError;

/// A published object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub size: u64,
}

/// Destination for encoded outputs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Publishes a local file under `key`.
    async fn put_file(&self, local: &Path, key: &str) -> Result<StoredObject, StorageError>;

    /// Publishes an in-memory payload under `key`.
    async fn put_bytes(
        &self,
        bytes: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> Result<StoredObject, StorageError>;

    /// Removes an object. Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Object keys for a video's outputs.
pub mod keys {
    pub fn variant(video_id: &str, label: &str) -> String {
        format!("videos/{}/{}.mp4", video_id, label)
    }

    pub fn thumbnail(video_id: &str, index: usize) -> String {
        format!("videos/{}/thumbnails/thumb_{}.jpg", video_id, index)
    }

    pub fn preview(video_id: &str) -> String {
        format!("videos/{}/preview.mp4", video_id)
    }

    pub fn hls_file(video_id: &str, label: &str, file_name: &str) -> String {
        format!("videos/{}/hls/{}/{}", video_id, label, file_name)
    }

    pub fn master_manifest(video_id: &str) -> String {
        format!("videos/{}/hls/master.m3u8", video_id)
    }
}

/// Publishes objects into a directory served at a public base URL.
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Public URL for a key.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(StorageError::Io {
                path: PathBuf::from(key),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid object key"),
            });
        }
        Ok(self.root.join(key))
    }

    async fn ensure_parent(path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_file(&self, local: &Path, key: &str) -> Result<StoredObject, StorageError> {
        let target = self.path_for(key)?;
        Self::ensure_parent(&target).await?;

        let size = tokio::fs::copy(local, &target)
            .await
            .map_err(|e| StorageError::Io {
                path: local.to_path_buf(),
                source: e,
            })?;

        debug!(key, size, "Stored object");
        Ok(StoredObject {
            key: key.to_string(),
            url: self.url_for(key),
            size,
        })
    }

    async fn put_bytes(
        &self,
        bytes: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let target = self.path_for(key)?;
        Self::ensure_parent(&target).await?;

        let size = bytes.len() as u64;
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| StorageError::Io {
                path: target.clone(),
                source: e,
            })?;

        debug!(key, size, content_type, "Stored object");
        Ok(StoredObject {
            key: key.to_string(),
            url: self.url_for(key),
            size,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let target = self.path_for(key)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io {
                path: target,
                source: e,
            }),
        }
    }
}
