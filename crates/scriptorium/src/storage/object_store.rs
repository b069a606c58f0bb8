//! Blob storage keyed by object name.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use crate::error::StorageError;

/// A fallible stream of byte chunks, used for uploads that must not be
/// buffered in memory.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Wraps an in-memory buffer as a single-chunk [`ByteStream`].
pub fn stream_from_bytes(data: Bytes) -> ByteStream {
    Box::pin(futures_util::stream::once(async move { Ok(data) }))
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes `body` under `key`, replacing any existing object.
    async fn put(&self, key: &str, body: ByteStream, content_type: &str) -> Result<(), StorageError>;

    /// Keys starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Removes `key`. A missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Address of `key` as understood by other services (e.g. `gs://bucket/key`).
    fn uri(&self, key: &str) -> String;

    /// Strips this store's URI prefix, returning the bare key.
    fn key_from_uri<'a>(&self, uri: &'a str) -> Option<&'a str>;
}

/// Process-local store for tests and local runs without a bucket.
#[derive(Default)]
pub struct InMemoryObjectStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, (Bytes, String)>>,
}

impl InMemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    /// Inserts an object directly, bypassing streaming.
    pub fn insert(&self, key: &str, data: impl Into<Bytes>, content_type: &str) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.to_string(), (data.into(), content_type.to_string()));
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).map(|(_, ct)| ct.clone()))
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StorageError {
        StorageError::Stream("object map lock poisoned".to_string())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        mut body: ByteStream,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        self.objects
            .lock()
            .map_err(|_| Self::poisoned())?
            .insert(key.to_string(), (buffer.freeze(), content_type.to_string()));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let objects = self.objects.lock().map_err(|_| Self::poisoned())?;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let objects = self.objects.lock().map_err(|_| Self::poisoned())?;
        objects
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects
            .lock()
            .map_err(|_| Self::poisoned())?
            .remove(key);
        Ok(())
    }

    fn uri(&self, key: &str) -> String {
        format!("mem://{}/{}", self.bucket, key)
    }

    fn key_from_uri<'a>(&self, uri: &'a str) -> Option<&'a str> {
        uri.strip_prefix("mem://")?
            .strip_prefix(self.bucket.as_str())?
            .strip_prefix('/')
    }
}
