//! libSQL storage for export job records (offline, local file).
//!
//! The [`Storage`] struct wraps a libSQL database holding one row per export
//! job with its latest serialized [`JobProgress`].
//!
//! **Access rules:**
//! - The export pipeline: read-write (sole writer) via [`Storage::open`]
//! - Inspection tools (`bindery jobs`): read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use bindery_shared::{BinderyError, ExportFormat, JobId, JobProgress, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};

/// A persisted export job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub project_name: String,
    pub format: ExportFormat,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BinderyError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| BinderyError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| BinderyError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BinderyError::Storage(format!(
                "no job database at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| BinderyError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| BinderyError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        BinderyError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(BinderyError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Export job operations
    // -----------------------------------------------------------------------

    /// Insert a job, or replace its progress if it already exists.
    ///
    /// `created_at` is kept from the first write.
    pub async fn upsert_job(
        &self,
        id: &JobId,
        project_name: &str,
        format: ExportFormat,
        progress: &JobProgress,
    ) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        let progress_json = serde_json::to_string(progress)
            .map_err(|e| BinderyError::Storage(format!("serialize progress: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO export_jobs (id, project_name, format, progress_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    progress_json = excluded.progress_json,
                    updated_at = excluded.updated_at",
                params![
                    id.to_string(),
                    project_name,
                    format.to_string(),
                    progress_json,
                    now.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| BinderyError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Replace the progress of an existing job. Returns `false` if the job is unknown.
    pub async fn update_progress(&self, id: &JobId, progress: &JobProgress) -> Result<bool> {
        self.check_writable()?;
        let progress_json = serde_json::to_string(progress)
            .map_err(|e| BinderyError::Storage(format!("serialize progress: {e}")))?;
        let affected = self
            .conn
            .execute(
                "UPDATE export_jobs SET progress_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![progress_json, timestamp(Utc::now()), id.to_string()],
            )
            .await
            .map_err(|e| BinderyError::Storage(e.to_string()))?;
        Ok(affected > 0)
    }

    /// Get a job by id.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, project_name, format, progress_json, created_at, updated_at
                 FROM export_jobs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| BinderyError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(BinderyError::Storage(e.to_string())),
        }
    }

    /// List the most recent jobs, newest first.
    pub async fn list_jobs(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, project_name, format, progress_json, created_at, updated_at
                 FROM export_jobs ORDER BY created_at DESC, id DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| BinderyError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }

    /// Delete every job last updated before `cutoff`. Returns the number removed.
    pub async fn prune_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_writable()?;
        let cutoff = timestamp(cutoff);
        let affected = self
            .conn
            .execute(
                "DELETE FROM export_jobs WHERE updated_at < ?1",
                params![cutoff.as_str()],
            )
            .await
            .map_err(|e| BinderyError::Storage(e.to_string()))?;
        if affected > 0 {
            tracing::debug!(affected, "pruned export jobs");
        }
        Ok(affected)
    }
}

/// Fixed-width RFC 3339 so that string order matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BinderyError::Storage(format!("bad timestamp '{raw}': {e}")))
}

fn row_to_record(row: &libsql::Row) -> Result<JobRecord> {
    let get = |i: i32| {
        row.get::<String>(i)
            .map_err(|e| BinderyError::Storage(e.to_string()))
    };

    let id_raw = get(0)?;
    let id = id_raw
        .parse::<JobId>()
        .map_err(|e| BinderyError::Storage(format!("bad job id '{id_raw}': {e}")))?;
    let format = get(2)?
        .parse::<ExportFormat>()
        .map_err(BinderyError::Storage)?;
    let progress: JobProgress = serde_json::from_str(&get(3)?)
        .map_err(|e| BinderyError::Storage(format!("bad progress for job {id}: {e}")))?;

    Ok(JobRecord {
        id,
        project_name: get(1)?,
        format,
        progress,
        created_at: parse_timestamp(&get(4)?)?,
        updated_at: parse_timestamp(&get(5)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("bindery_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("bindery_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn job_upsert_and_get() {
        let storage = test_storage().await;
        let id = JobId::new();

        storage
            .upsert_job(&id, "Econ 101", ExportFormat::Pdf, &JobProgress::queued(7))
            .await
            .expect("insert job");

        let first = storage.get_job(&id).await.unwrap().expect("job exists");
        assert_eq!(first.project_name, "Econ 101");
        assert_eq!(first.format, ExportFormat::Pdf);
        assert_eq!(first.progress.total, 7);
        assert!(!first.progress.done);

        let finished = JobProgress {
            step: 7,
            total: 7,
            message: "Done".into(),
            done: true,
            output_path: Some("/tmp/econ_101.pdf".into()),
            ..JobProgress::default()
        };
        storage
            .upsert_job(&id, "Econ 101", ExportFormat::Pdf, &finished)
            .await
            .expect("update job");

        let second = storage.get_job(&id).await.unwrap().expect("job exists");
        assert!(second.progress.succeeded());
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn missing_job_is_none() {
        let storage = test_storage().await;
        assert!(storage.get_job(&JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_progress_requires_existing_job() {
        let storage = test_storage().await;
        let id = JobId::new();
        let progress = JobProgress {
            step: 2,
            ..JobProgress::queued(5)
        };
        assert!(!storage.update_progress(&id, &progress).await.unwrap());

        storage
            .upsert_job(&id, "Reader", ExportFormat::Epub, &JobProgress::queued(5))
            .await
            .unwrap();
        assert!(storage.update_progress(&id, &progress).await.unwrap());
        let record = storage.get_job(&id).await.unwrap().unwrap();
        assert_eq!(record.progress.step, 2);
    }

    #[tokio::test]
    async fn list_jobs_respects_limit() {
        let storage = test_storage().await;
        let ids: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();
        for id in &ids {
            storage
                .upsert_job(id, "Reader", ExportFormat::Markdown, &JobProgress::queued(4))
                .await
                .unwrap();
        }

        assert_eq!(storage.list_jobs(10).await.unwrap().len(), 3);
        let newest = storage.list_jobs(2).await.unwrap();
        assert_eq!(newest.len(), 2);
        assert!(newest[0].created_at >= newest[1].created_at);
    }

    #[tokio::test]
    async fn prune_removes_stale_jobs() {
        let storage = test_storage().await;
        let id = JobId::new();
        storage
            .upsert_job(&id, "Old", ExportFormat::Epub, &JobProgress::queued(3))
            .await
            .unwrap();

        let removed = storage
            .prune_jobs(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = storage
            .prune_jobs(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(storage.get_job(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("bindery_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        let id = JobId::new();
        rw.upsert_job(&id, "Shared", ExportFormat::Pdf, &JobProgress::queued(3))
            .await
            .unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert!(ro.get_job(&id).await.unwrap().is_some());
        let err = ro
            .upsert_job(&id, "Shared", ExportFormat::Pdf, &JobProgress::queued(3))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        let tmp = std::env::temp_dir().join(format!("bindery_missing_{}.db", Uuid::now_v7()));
        assert!(Storage::open_readonly(&tmp).await.is_err());
    }
}
