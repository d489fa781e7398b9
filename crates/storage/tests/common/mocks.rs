use alyx_storage::error::{StorageError, StorageResult};
use alyx_storage::traits::{ByteStream, ObjectMeta, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Wraps a store and fails every `put` whose key contains a marker.
#[allow(dead_code)]
pub struct FailingPutStore {
    inner: Arc<dyn ObjectStore>,
    marker: String,
    pub puts: AtomicUsize,
}

#[allow(dead_code)]
impl FailingPutStore {
    pub fn new(inner: Arc<dyn ObjectStore>, marker: &str) -> Arc<Self> {
        Arc::new(Self {
            inner,
            marker: marker.to_string(),
            puts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ObjectStore for FailingPutStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if key.contains(&self.marker) {
            return Err(StorageError::Io(std::io::Error::other("injected write failure")));
        }
        self.inner.put(key, data).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "failing-put"
    }
}
