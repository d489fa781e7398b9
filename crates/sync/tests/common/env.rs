use super::RecordingTransfer;
use alyx_catalog::repos::{DatasetRepo, FileRecordRepo, SessionRepo};
use alyx_catalog::FileRecordFilter;
use alyx_core::config::{AppConfig, RepositoryConfig, StorageConfig};
use alyx_core::{Dataset, FileRecord, Provenance, RepositoryKind, Session};
use alyx_storage::ObjectStore;
use alyx_sync::{SyncContext, expected_path};
use bytes::Bytes;
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use time::macros::date;
use uuid::Uuid;

/// Catalog plus three filesystem repositories in a temp dir:
/// `flatiron` (authoritative local mirror), `tape` and `aws`.
#[allow(dead_code)]
pub struct TestEnv {
    pub ctx: SyncContext,
    pub transfer: Arc<RecordingTransfer>,
    _dir: TempDir,
}

#[allow(dead_code)]
impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(dir.path().join("catalog.db"));
        config.repositories = vec![
            fs_repo(&dir, "flatiron", RepositoryKind::LocalMirror),
            fs_repo(&dir, "tape", RepositoryKind::TapeArchive),
            fs_repo(&dir, "aws", RepositoryKind::CloudBucket),
        ];
        adjust(&mut config);

        let mut ctx = SyncContext::from_config(config, None).await.unwrap();
        let transfer = RecordingTransfer::new(ctx.transfer.clone());
        ctx.transfer = transfer.clone();
        Self {
            ctx,
            transfer,
            _dir: dir,
        }
    }

    pub fn store(&self, repository: &str) -> Arc<dyn ObjectStore> {
        self.ctx.registry.get(repository).unwrap().store.clone()
    }

    pub async fn session(&self, number: u16, modified_at: OffsetDateTime) -> Session {
        let session = Session {
            id: Uuid::new_v4(),
            lab: "cortexlab".to_string(),
            subject: "KS023".to_string(),
            start_date: date!(2019 - 12 - 10),
            number,
            modified_at,
        };
        self.ctx.catalog.create_session(&session).await.unwrap();
        session
    }

    pub async fn dataset(&self, session: &Session, name: &str, modified_at: OffsetDateTime) -> Dataset {
        let dataset = Dataset {
            id: Uuid::new_v4(),
            session_id: session.id,
            name: name.to_string(),
            collection: Some("alf".to_string()),
            revision: None,
            file_size: None,
            hash: None,
            provenance: Provenance::default(),
            default_dataset: true,
            modified_at,
        };
        self.ctx.catalog.create_dataset(&dataset).await.unwrap();
        dataset
    }

    /// Write the dataset's file at its canonical path on `repository`.
    pub async fn write(&self, repository: &str, session: &Session, dataset: &Dataset, data: &[u8]) -> String {
        let path = expected_path(session, dataset).unwrap();
        self.store(repository)
            .put(&path, Bytes::copy_from_slice(data))
            .await
            .unwrap();
        path
    }

    pub async fn record(&self, dataset: &Dataset, repository: &str, path: &str, exists: bool) -> FileRecord {
        let record = FileRecord {
            id: Uuid::new_v4(),
            dataset_id: dataset.id,
            repository: repository.to_string(),
            relative_path: path.to_string(),
            exists,
            invalidated_at: None,
            modified_at: OffsetDateTime::now_utc(),
        };
        self.ctx.catalog.create_file_record(&record).await.unwrap();
        record
    }

    pub async fn records(&self, dataset_id: Uuid, repository: &str) -> Vec<FileRecord> {
        self.ctx
            .catalog
            .list_file_records(&FileRecordFilter::for_datasets([dataset_id]).repository(repository))
            .await
            .unwrap()
    }

    pub async fn reload(&self, dataset_id: Uuid) -> Dataset {
        self.ctx.catalog.get_dataset(dataset_id).await.unwrap().unwrap()
    }
}

fn fs_repo(dir: &TempDir, name: &str, kind: RepositoryKind) -> RepositoryConfig {
    RepositoryConfig {
        name: name.to_string(),
        kind,
        storage: StorageConfig::Filesystem {
            path: dir.path().join(name),
        },
        hostname: None,
        is_personal: false,
        authoritative: None,
        labs: Vec::new(),
        credentials: None,
    }
}
