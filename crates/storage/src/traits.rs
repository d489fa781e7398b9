//! Storage trait definitions.

use crate::error::StorageResult;
use alyx_core::ContentHash;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use time::OffsetDateTime;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Byte-addressable store holding one repository's files.
///
/// Keys are paths relative to the repository root, `/` separated.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size and modification time without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Put an object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List object keys below a prefix, sorted.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Static identifier for the backend type, used in logs.
    fn backend_name(&self) -> &'static str;
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
}

/// Probe operations derived from [`ObjectStore`].
///
/// DO NOT IMPLEMENT THIS TRAIT MANUALLY. A blanket implementation covers
/// every object store.
#[async_trait]
pub trait StorageProbe: ObjectStore {
    async fn size(&self, key: &str) -> StorageResult<u64> {
        Ok(self.head(key).await?.size)
    }

    async fn last_modified(&self, key: &str) -> StorageResult<Option<OffsetDateTime>> {
        Ok(self.head(key).await?.last_modified)
    }

    /// Stream the object through SHA-256.
    async fn content_hash(&self, key: &str) -> StorageResult<ContentHash> {
        let mut stream = self.get_stream(key).await?;
        let mut hasher = ContentHash::hasher();
        while let Some(chunk) = stream.next().await {
            hasher.update(&chunk?);
        }
        Ok(hasher.finalize())
    }
}

impl<T: ObjectStore + ?Sized> StorageProbe for T {}
