//! Catalog store trait and the SQLite implementation.

use crate::error::{CatalogError, CatalogResult};
use crate::repos::{DatasetRepo, FileRecordRepo, RepositoryRepo, SessionRepo, WatermarkRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Combined catalog trait.
#[async_trait]
pub trait CatalogStore:
    RepositoryRepo + SessionRepo + DatasetRepo + FileRecordRepo + WatermarkRepo + Send + Sync
{
    /// Apply the schema.
    async fn migrate(&self) -> CatalogResult<()>;
}

/// SQLite-backed catalog.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) the catalog database at `path`.
    pub async fn new(path: impl AsRef<Path>, busy_timeout_secs: u64) -> CatalogResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(busy_timeout_secs));

        // One connection: every read-modify-write below is serialized.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "catalog opened");
        Ok(store)
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn migrate(&self) -> CatalogResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

/// Append `AND column IN (...)`; an empty list matches nothing.
fn push_uuid_in(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, ids: &[Uuid]) {
    if ids.is_empty() {
        qb.push(" AND 0");
        return;
    }
    qb.push(" AND ").push(column).push(" IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

fn push_text_in(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, values: &[String]) {
    if values.is_empty() {
        qb.push(" AND 0");
        return;
    }
    qb.push(" AND ").push(column).push(" IN (");
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
    separated.push_unseparated(")");
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::{DatasetFilter, FileRecordFilter};
    use alyx_core::{
        Dataset, FileRecord, Provenance, Repository, Session, Watermark, catalog_timestamp,
    };
    use time::{Date, OffsetDateTime};

    fn stamp(at: Option<OffsetDateTime>) -> Option<OffsetDateTime> {
        at.map(catalog_timestamp)
    }

    fn size_to_i64(dataset_id: Uuid, size: u64) -> CatalogResult<i64> {
        i64::try_from(size).map_err(|_| CatalogError::Corrupt {
            table: "datasets",
            detail: format!("file_size {size} for {dataset_id} exceeds i64"),
        })
    }

    #[async_trait]
    impl RepositoryRepo for SqliteStore {
        async fn upsert_repository(&self, repository: &Repository) -> CatalogResult<()> {
            let row = RepositoryRow::from_domain(repository);
            sqlx::query(
                r#"
                INSERT INTO repositories (name, kind, root, hostname, is_personal, authoritative, labs)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET
                    kind = excluded.kind,
                    root = excluded.root,
                    hostname = excluded.hostname,
                    is_personal = excluded.is_personal,
                    authoritative = excluded.authoritative,
                    labs = excluded.labs
                "#,
            )
            .bind(&row.name)
            .bind(&row.kind)
            .bind(&row.root)
            .bind(&row.hostname)
            .bind(row.is_personal)
            .bind(row.authoritative)
            .bind(&row.labs)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_repository(&self, name: &str) -> CatalogResult<Option<Repository>> {
            let row =
                sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?;
            row.map(RepositoryRow::into_domain).transpose()
        }

        async fn list_repositories(&self) -> CatalogResult<Vec<Repository>> {
            let rows =
                sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories ORDER BY name")
                    .fetch_all(&self.pool)
                    .await?;
            rows.into_iter().map(RepositoryRow::into_domain).collect()
        }
    }

    #[async_trait]
    impl SessionRepo for SqliteStore {
        async fn create_session(&self, session: &Session) -> CatalogResult<()> {
            if self.get_session(session.id).await?.is_some() {
                return Err(CatalogError::AlreadyExists(format!(
                    "session {} already exists",
                    session.id
                )));
            }
            sqlx::query(
                "INSERT INTO sessions (session_id, lab, subject, start_date, number, modified_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(session.id)
            .bind(&session.lab)
            .bind(&session.subject)
            .bind(session.start_date)
            .bind(i64::from(session.number))
            .bind(catalog_timestamp(session.modified_at))
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_session(&self, session_id: Uuid) -> CatalogResult<Option<Session>> {
            let row =
                sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE session_id = ?")
                    .bind(session_id)
                    .fetch_optional(&self.pool)
                    .await?;
            row.map(SessionRow::into_domain).transpose()
        }

        async fn get_sessions(&self, session_ids: &[Uuid]) -> CatalogResult<Vec<Session>> {
            let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM sessions WHERE 1 = 1");
            push_uuid_in(&mut qb, "session_id", session_ids);
            qb.push(" ORDER BY modified_at, session_id");
            let rows = qb
                .build_query_as::<SessionRow>()
                .fetch_all(&self.pool)
                .await?;
            rows.into_iter().map(SessionRow::into_domain).collect()
        }

        async fn find_session(
            &self,
            lab: &str,
            subject: &str,
            start_date: Date,
            number: u16,
        ) -> CatalogResult<Option<Session>> {
            let row = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM sessions WHERE lab = ? AND subject = ? AND start_date = ? AND number = ?",
            )
            .bind(lab)
            .bind(subject)
            .bind(start_date)
            .bind(i64::from(number))
            .fetch_optional(&self.pool)
            .await?;
            row.map(SessionRow::into_domain).transpose()
        }
    }

    #[async_trait]
    impl DatasetRepo for SqliteStore {
        async fn create_dataset(&self, dataset: &Dataset) -> CatalogResult<()> {
            if self.get_dataset(dataset.id).await?.is_some() {
                return Err(CatalogError::AlreadyExists(format!(
                    "dataset {} already exists",
                    dataset.id
                )));
            }
            let file_size = dataset
                .file_size
                .map(|size| size_to_i64(dataset.id, size))
                .transpose()?;
            sqlx::query(
                r#"
                INSERT INTO datasets (
                    dataset_id, session_id, name, collection, revision,
                    file_size, hash, file_size_updated_at, hash_updated_at,
                    confirmed_empty_at, aggregate_hash, default_dataset, modified_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(dataset.id)
            .bind(dataset.session_id)
            .bind(&dataset.name)
            .bind(&dataset.collection)
            .bind(&dataset.revision)
            .bind(file_size)
            .bind(&dataset.hash)
            .bind(stamp(dataset.provenance.file_size_updated_at))
            .bind(stamp(dataset.provenance.hash_updated_at))
            .bind(stamp(dataset.provenance.confirmed_empty_at))
            .bind(&dataset.provenance.aggregate_hash)
            .bind(dataset.default_dataset)
            .bind(catalog_timestamp(dataset.modified_at))
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_dataset(&self, dataset_id: Uuid) -> CatalogResult<Option<Dataset>> {
            let row =
                sqlx::query_as::<_, DatasetRow>("SELECT * FROM datasets WHERE dataset_id = ?")
                    .bind(dataset_id)
                    .fetch_optional(&self.pool)
                    .await?;
            row.map(DatasetRow::into_domain).transpose()
        }

        async fn list_datasets(&self, filter: &DatasetFilter) -> CatalogResult<Vec<Dataset>> {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT d.* FROM datasets d JOIN sessions s ON s.session_id = d.session_id WHERE 1 = 1",
            );
            if let Some(ids) = &filter.ids {
                push_uuid_in(&mut qb, "d.dataset_id", ids);
            }
            if let Some(session_ids) = &filter.session_ids {
                push_uuid_in(&mut qb, "d.session_id", session_ids);
            }
            if let Some(after) = filter.modified_after {
                qb.push(" AND d.modified_at >= ")
                    .push_bind(catalog_timestamp(after));
            }
            if let Some(labs) = &filter.labs {
                push_text_in(&mut qb, "s.lab", labs);
            }
            qb.push(" ORDER BY d.modified_at, d.dataset_id");
            match (filter.limit, filter.offset) {
                (Some(limit), offset) => {
                    qb.push(" LIMIT ").push_bind(i64::from(limit));
                    qb.push(" OFFSET ")
                        .push_bind(i64::from(offset.unwrap_or(0)));
                }
                (None, Some(offset)) => {
                    qb.push(" LIMIT -1 OFFSET ").push_bind(i64::from(offset));
                }
                (None, None) => {}
            }

            let rows = qb
                .build_query_as::<DatasetRow>()
                .fetch_all(&self.pool)
                .await?;
            rows.into_iter().map(DatasetRow::into_domain).collect()
        }

        async fn find_dataset(
            &self,
            session_id: Uuid,
            collection: Option<&str>,
            revision: Option<&str>,
            name: &str,
        ) -> CatalogResult<Vec<Dataset>> {
            let rows = sqlx::query_as::<_, DatasetRow>(
                r#"
                SELECT * FROM datasets
                WHERE session_id = ? AND collection IS ? AND revision IS ? AND name = ?
                ORDER BY modified_at, dataset_id
                "#,
            )
            .bind(session_id)
            .bind(collection)
            .bind(revision)
            .bind(name)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(DatasetRow::into_domain).collect()
        }

        async fn update_dataset_size(
            &self,
            dataset_id: Uuid,
            file_size: u64,
            at: OffsetDateTime,
        ) -> CatalogResult<()> {
            let result = sqlx::query(
                "UPDATE datasets SET file_size = ?, file_size_updated_at = ? WHERE dataset_id = ?",
            )
            .bind(size_to_i64(dataset_id, file_size)?)
            .bind(catalog_timestamp(at))
            .bind(dataset_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(CatalogError::NotFound(format!("dataset {dataset_id}")));
            }
            Ok(())
        }

        async fn update_dataset_hash(
            &self,
            dataset_id: Uuid,
            hash: &str,
            at: OffsetDateTime,
        ) -> CatalogResult<()> {
            let result = sqlx::query(
                "UPDATE datasets SET hash = ?, hash_updated_at = ? WHERE dataset_id = ?",
            )
            .bind(hash)
            .bind(catalog_timestamp(at))
            .bind(dataset_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(CatalogError::NotFound(format!("dataset {dataset_id}")));
            }
            Ok(())
        }

        async fn merge_provenance(
            &self,
            dataset_id: Uuid,
            update: &Provenance,
        ) -> CatalogResult<Provenance> {
            let mut tx = self.pool.begin().await?;

            let row =
                sqlx::query_as::<_, DatasetRow>("SELECT * FROM datasets WHERE dataset_id = ?")
                    .bind(dataset_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or_else(|| CatalogError::NotFound(format!("dataset {dataset_id}")))?;

            let mut provenance = row.into_domain()?.provenance;
            provenance.merge(update);

            sqlx::query(
                r#"
                UPDATE datasets SET
                    file_size_updated_at = ?,
                    hash_updated_at = ?,
                    confirmed_empty_at = ?,
                    aggregate_hash = ?
                WHERE dataset_id = ?
                "#,
            )
            .bind(stamp(provenance.file_size_updated_at))
            .bind(stamp(provenance.hash_updated_at))
            .bind(stamp(provenance.confirmed_empty_at))
            .bind(&provenance.aggregate_hash)
            .bind(dataset_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(provenance)
        }

        async fn touch_dataset(&self, dataset_id: Uuid, at: OffsetDateTime) -> CatalogResult<()> {
            let result = sqlx::query("UPDATE datasets SET modified_at = ? WHERE dataset_id = ?")
                .bind(catalog_timestamp(at))
                .bind(dataset_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(CatalogError::NotFound(format!("dataset {dataset_id}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl FileRecordRepo for SqliteStore {
        async fn create_file_record(&self, record: &FileRecord) -> CatalogResult<()> {
            sqlx::query(
                "INSERT INTO file_records (record_id, dataset_id, repository, relative_path, exists_flag, invalidated_at, modified_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record.id)
            .bind(record.dataset_id)
            .bind(&record.repository)
            .bind(&record.relative_path)
            .bind(record.exists)
            .bind(stamp(record.invalidated_at))
            .bind(catalog_timestamp(record.modified_at))
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_or_create_file_record(
            &self,
            dataset_id: Uuid,
            repository: &str,
            relative_path: &str,
            exists: bool,
            at: OffsetDateTime,
        ) -> CatalogResult<(FileRecord, bool)> {
            let mut tx = self.pool.begin().await?;

            let existing = sqlx::query_as::<_, FileRecordRow>(
                "SELECT * FROM file_records WHERE dataset_id = ? AND repository = ? ORDER BY rowid LIMIT 1",
            )
            .bind(dataset_id)
            .bind(repository)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = existing {
                tx.commit().await?;
                return Ok((row.into(), false));
            }

            let record = FileRecord {
                id: Uuid::new_v4(),
                dataset_id,
                repository: repository.to_string(),
                relative_path: relative_path.to_string(),
                exists,
                invalidated_at: None,
                modified_at: catalog_timestamp(at),
            };
            sqlx::query(
                "INSERT INTO file_records (record_id, dataset_id, repository, relative_path, exists_flag, modified_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(record.id)
            .bind(record.dataset_id)
            .bind(&record.repository)
            .bind(&record.relative_path)
            .bind(record.exists)
            .bind(record.modified_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok((record, true))
        }

        async fn get_file_record(&self, record_id: Uuid) -> CatalogResult<Option<FileRecord>> {
            let row =
                sqlx::query_as::<_, FileRecordRow>("SELECT * FROM file_records WHERE record_id = ?")
                    .bind(record_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.map(Into::into))
        }

        async fn list_file_records(
            &self,
            filter: &FileRecordFilter,
        ) -> CatalogResult<Vec<FileRecord>> {
            let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM file_records WHERE 1 = 1");
            if let Some(dataset_ids) = &filter.dataset_ids {
                push_uuid_in(&mut qb, "dataset_id", dataset_ids);
            }
            if let Some(repositories) = &filter.repositories {
                push_text_in(&mut qb, "repository", repositories);
            }
            if let Some(exists) = filter.exists {
                qb.push(" AND exists_flag = ").push_bind(exists);
            }
            qb.push(" ORDER BY dataset_id, repository, rowid");

            let rows = qb
                .build_query_as::<FileRecordRow>()
                .fetch_all(&self.pool)
                .await?;
            Ok(rows.into_iter().map(Into::into).collect())
        }

        async fn set_file_record_exists(
            &self,
            record_ids: &[Uuid],
            exists: bool,
            at: OffsetDateTime,
        ) -> CatalogResult<u64> {
            if record_ids.is_empty() {
                return Ok(0);
            }
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE file_records SET exists_flag = ");
            qb.push_bind(exists);
            if exists {
                qb.push(", invalidated_at = NULL");
            }
            qb.push(", modified_at = ")
                .push_bind(catalog_timestamp(at))
                .push(" WHERE 1 = 1");
            push_uuid_in(&mut qb, "record_id", record_ids);

            let result = qb.build().execute(&self.pool).await?;
            Ok(result.rows_affected())
        }

        async fn invalidate_file_record(
            &self,
            record_id: Uuid,
            at: OffsetDateTime,
        ) -> CatalogResult<()> {
            let at = catalog_timestamp(at);
            let result = sqlx::query(
                "UPDATE file_records SET exists_flag = 0, invalidated_at = ?, modified_at = ? WHERE record_id = ?",
            )
            .bind(at)
            .bind(at)
            .bind(record_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(CatalogError::NotFound(format!("file record {record_id}")));
            }
            Ok(())
        }

        async fn set_file_record_path(
            &self,
            record_id: Uuid,
            relative_path: &str,
            at: OffsetDateTime,
        ) -> CatalogResult<()> {
            let result = sqlx::query(
                "UPDATE file_records SET relative_path = ?, modified_at = ? WHERE record_id = ?",
            )
            .bind(relative_path)
            .bind(catalog_timestamp(at))
            .bind(record_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(CatalogError::NotFound(format!("file record {record_id}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl WatermarkRepo for SqliteStore {
        async fn append_watermark(&self, watermark: &Watermark) -> CatalogResult<()> {
            let entry = Watermark::new(
                watermark.channel.clone(),
                watermark.started_at,
                watermark.finished_at,
            )?;

            let mut tx = self.pool.begin().await?;

            let previous = sqlx::query_as::<_, WatermarkRow>(
                "SELECT * FROM watermarks WHERE channel = ? ORDER BY watermark_id DESC LIMIT 1",
            )
            .bind(&entry.channel)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(previous) = previous {
                entry.follows(&previous.into())?;
            }

            sqlx::query("INSERT INTO watermarks (channel, started_at, finished_at) VALUES (?, ?, ?)")
                .bind(&entry.channel)
                .bind(entry.started_at)
                .bind(entry.finished_at)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(())
        }

        async fn last_watermark(&self, channel: &str) -> CatalogResult<Option<Watermark>> {
            let row = sqlx::query_as::<_, WatermarkRow>(
                "SELECT * FROM watermarks WHERE channel = ? ORDER BY watermark_id DESC LIMIT 1",
            )
            .bind(channel)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(Into::into))
        }

        async fn list_watermarks(&self, channel: &str) -> CatalogResult<Vec<Watermark>> {
            let rows = sqlx::query_as::<_, WatermarkRow>(
                "SELECT * FROM watermarks WHERE channel = ? ORDER BY watermark_id",
            )
            .bind(channel)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(Into::into).collect())
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    name TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    root TEXT NOT NULL,
    hostname TEXT,
    is_personal INTEGER NOT NULL DEFAULT 0,
    authoritative INTEGER NOT NULL DEFAULT 0,
    labs TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id BLOB PRIMARY KEY,
    lab TEXT NOT NULL,
    subject TEXT NOT NULL,
    start_date TEXT NOT NULL,
    number INTEGER NOT NULL,
    modified_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_path ON sessions(lab, subject, start_date, number);
CREATE INDEX IF NOT EXISTS idx_sessions_modified ON sessions(modified_at);

CREATE TABLE IF NOT EXISTS datasets (
    dataset_id BLOB PRIMARY KEY,
    session_id BLOB NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    collection TEXT,
    revision TEXT,
    file_size INTEGER,
    hash TEXT,
    file_size_updated_at TEXT,
    hash_updated_at TEXT,
    confirmed_empty_at TEXT,
    aggregate_hash TEXT,
    default_dataset INTEGER NOT NULL DEFAULT 1,
    modified_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_datasets_modified ON datasets(modified_at);
CREATE INDEX IF NOT EXISTS idx_datasets_session ON datasets(session_id, collection, name);

-- No unique constraint on (dataset_id, repository): duplicates must stay
-- visible so they can be reported as conflicts.
CREATE TABLE IF NOT EXISTS file_records (
    record_id BLOB PRIMARY KEY,
    dataset_id BLOB NOT NULL REFERENCES datasets(dataset_id) ON DELETE CASCADE,
    repository TEXT NOT NULL REFERENCES repositories(name),
    relative_path TEXT NOT NULL,
    exists_flag INTEGER NOT NULL DEFAULT 0,
    invalidated_at TEXT,
    modified_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_file_records_dataset ON file_records(dataset_id, repository);
CREATE INDEX IF NOT EXISTS idx_file_records_repository ON file_records(repository, exists_flag);

CREATE TABLE IF NOT EXISTS watermarks (
    watermark_id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    CHECK (finished_at >= started_at)
);
CREATE INDEX IF NOT EXISTS idx_watermarks_channel ON watermarks(channel, watermark_id);
"#;
