//! Read access to uploaded originals.
//!
//! Ingestion never touches an upload by path directly: it asks for a
//! short-lived [`SourceReference`] and reads through it, either as a stream
//! (async OCR) or as a bounded buffer (native extraction, sync OCR).

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration, Utc};
use futures_util::StreamExt;
use tokio::io::AsyncReadExt;

use super::object_store::ByteStream;
use crate::error::StorageError;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A time-limited handle on one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReference {
    pub location: String,
    pub size_bytes: u64,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait UploadSource: Send + Sync {
    /// Issues a reference to `storage_path` valid for `ttl`.
    async fn reference(
        &self,
        storage_path: &str,
        ttl: Duration,
    ) -> Result<SourceReference, StorageError>;

    /// Opens the referenced file as a chunk stream.
    async fn open(&self, reference: &SourceReference) -> Result<ByteStream, StorageError>;

    /// Reads the whole file, refusing anything larger than `limit` bytes.
    async fn read_all(
        &self,
        reference: &SourceReference,
        limit: u64,
    ) -> Result<Bytes, StorageError> {
        if reference.size_bytes > limit {
            return Err(StorageError::TooLarge {
                size: reference.size_bytes,
                limit,
            });
        }

        let mut stream = self.open(reference).await?;
        let mut buffer = BytesMut::with_capacity(reference.size_bytes as usize);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if (buffer.len() + chunk.len()) as u64 > limit {
                return Err(StorageError::TooLarge {
                    size: (buffer.len() + chunk.len()) as u64,
                    limit,
                });
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }
}

/// Uploads stored under a local directory.
pub struct FsUploadSource {
    root: PathBuf,
}

impl FsUploadSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Joins `storage_path` under the root, rejecting `..` and absolute paths.
    fn resolve(&self, storage_path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(storage_path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || storage_path.is_empty() {
            return Err(StorageError::NotFound(storage_path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn check_expiry(reference: &SourceReference) -> Result<(), StorageError> {
        if Utc::now() >= reference.expires_at {
            return Err(StorageError::Stream(format!(
                "reference to '{}' expired at {}",
                reference.location, reference.expires_at
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl UploadSource for FsUploadSource {
    async fn reference(
        &self,
        storage_path: &str,
        ttl: Duration,
    ) -> Result<SourceReference, StorageError> {
        let path = self.resolve(storage_path)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(storage_path.to_string())
            } else {
                StorageError::ReadFile {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;

        Ok(SourceReference {
            location: path.to_string_lossy().to_string(),
            size_bytes: metadata.len(),
            expires_at: Utc::now() + ttl,
        })
    }

    async fn open(&self, reference: &SourceReference) -> Result<ByteStream, StorageError> {
        Self::check_expiry(reference)?;

        let path = PathBuf::from(&reference.location);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| StorageError::ReadFile {
                path: path.clone(),
                source: e,
            })?;

        let stream = futures_util::stream::unfold(Some((file, path)), |state| async move {
            let (mut file, path) = state?;
            let mut chunk = BytesMut::zeroed(READ_CHUNK_SIZE);
            match file.read(&mut chunk).await {
                Ok(0) => None,
                Ok(n) => {
                    chunk.truncate(n);
                    Some((Ok(chunk.freeze()), Some((file, path))))
                }
                Err(e) => Some((Err(StorageError::ReadFile { path, source: e }), None)),
            }
        });

        Ok(Box::pin(stream))
    }
}
