//! Storage access for Alyx repositories.
//!
//! This crate provides:
//! - The `ObjectStore` abstraction and the `StorageProbe` checks built on it
//! - Backends: local filesystem (mirrors, tape mounts) and S3-compatible buckets
//! - The bulk transfer primitive: `rsync`, `aws s3 sync`, or an in-process copier

pub mod backends;
pub mod error;
pub mod traits;
pub mod transfer;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectMeta, ObjectStore, StorageProbe};
pub use transfer::{
    BulkTransfer, CommandTransfer, NativeTransfer, TransferEndpoint, TransferOutput,
    TransferRequest, transfer_from_config,
};

use alyx_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
///
/// `profile` names the credential profile used when the config carries no
/// explicit keys.
pub async fn from_config(
    config: &StorageConfig,
    profile: Option<&str>,
) -> StorageResult<Arc<dyn ObjectStore>> {
    config
        .validate()
        .map_err(|e| StorageError::Config(e.to_string()))?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.as_ref().map(|s| s.expose().to_string()),
                *force_path_style,
                profile,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alyx_core::Credentials;
    use bytes::Bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: temp.path().join("flatiron"),
        };

        let store = from_config(&config, None).await.unwrap();
        store
            .put("hello.txt", Bytes::from_static(b"hi"))
            .await
            .unwrap();
        assert!(store.exists("hello.txt").await.unwrap());
        assert_eq!(store.backend_name(), "filesystem");
    }

    #[tokio::test]
    async fn from_config_s3_with_keys_ok() {
        let config = StorageConfig::S3 {
            bucket: "ibl-brain-wide-map".to_string(),
            endpoint: Some("minio:9000".to_string()),
            region: Some("us-east-1".to_string()),
            prefix: Some("data".to_string()),
            access_key_id: Some("access".to_string()),
            secret_access_key: Some(Credentials::new("secret")),
            force_path_style: true,
        };

        let store = from_config(&config, None).await.unwrap();
        assert_eq!(store.backend_name(), "s3");
    }

    #[tokio::test]
    async fn from_config_rejects_partial_credentials() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };

        match from_config(&config, None).await {
            Ok(_) => panic!("expected error"),
            Err(StorageError::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
