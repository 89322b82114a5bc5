//! Job progress stores.
//!
//! The pipeline writes every state change through a [`JobStore`]. Callers poll
//! with `get` or follow changes with a `watch` receiver from `subscribe`.
//! Finished jobs stay readable for a retention period, then are evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use bindery_shared::{BinderyError, ExportFormat, JobId, JobProgress, Result};
use bindery_storage::Storage;

/// Job-keyed progress state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Register a new job with its initial state.
    async fn create(
        &self,
        id: &JobId,
        project_name: &str,
        format: ExportFormat,
        progress: JobProgress,
    ) -> Result<()>;

    /// Replace the state of a registered job.
    async fn set(&self, id: &JobId, progress: JobProgress) -> Result<()>;

    /// Current state, or `None` for unknown (or evicted) jobs.
    async fn get(&self, id: &JobId) -> Result<Option<JobProgress>>;

    /// Follow a job still held in memory.
    async fn subscribe(&self, id: &JobId) -> Option<watch::Receiver<JobProgress>>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

type Channels = HashMap<JobId, watch::Sender<JobProgress>>;

/// Process-local store backed by one `watch` channel per job.
#[derive(Clone)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<Channels>>,
    retain: Duration,
}

impl MemoryJobStore {
    /// `retain` is how long a finished job stays readable.
    pub fn new(retain: Duration) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            retain,
        }
    }

    /// Number of jobs currently held.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    fn schedule_eviction(&self, id: JobId) {
        let jobs = Arc::clone(&self.jobs);
        let retain = self.retain;
        tokio::spawn(async move {
            tokio::time::sleep(retain).await;
            if jobs.write().await.remove(&id).is_some() {
                debug!(job_id = %id, "finished job evicted");
            }
        });
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        id: &JobId,
        _project_name: &str,
        _format: ExportFormat,
        progress: JobProgress,
    ) -> Result<()> {
        let (tx, _rx) = watch::channel(progress);
        self.jobs.write().await.insert(*id, tx);
        Ok(())
    }

    async fn set(&self, id: &JobId, progress: JobProgress) -> Result<()> {
        let done = progress.done;
        {
            let jobs = self.jobs.read().await;
            let tx = jobs
                .get(id)
                .ok_or_else(|| BinderyError::validation(format!("unknown job {id}")))?;
            // `send` fails without receivers; the state must be stored regardless.
            tx.send_replace(progress);
        }
        if done {
            self.schedule_eviction(*id);
        }
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobProgress>> {
        Ok(self.jobs.read().await.get(id).map(|tx| tx.borrow().clone()))
    }

    async fn subscribe(&self, id: &JobId) -> Option<watch::Receiver<JobProgress>> {
        self.jobs.read().await.get(id).map(|tx| tx.subscribe())
    }
}

// ---------------------------------------------------------------------------
// Write-through store
// ---------------------------------------------------------------------------

/// In-memory store that also persists every change to the job database.
///
/// Reads fall back to the database once a job has been evicted from memory.
#[derive(Clone)]
pub struct PersistentJobStore {
    memory: MemoryJobStore,
    storage: Arc<Storage>,
}

impl PersistentJobStore {
    pub fn new(storage: Arc<Storage>, retain: Duration) -> Self {
        Self {
            memory: MemoryJobStore::new(retain),
            storage,
        }
    }

    /// Drop database records not updated for `days` days; 0 keeps everything.
    pub async fn prune_history(&self, days: u32) -> Result<u64> {
        if days == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - TimeDelta::days(i64::from(days));
        let removed = self.storage.prune_jobs(cutoff).await?;
        if removed > 0 {
            info!(removed, days, "old job records pruned");
        }
        Ok(removed)
    }
}

#[async_trait]
impl JobStore for PersistentJobStore {
    async fn create(
        &self,
        id: &JobId,
        project_name: &str,
        format: ExportFormat,
        progress: JobProgress,
    ) -> Result<()> {
        self.storage
            .upsert_job(id, project_name, format, &progress)
            .await?;
        self.memory.create(id, project_name, format, progress).await
    }

    async fn set(&self, id: &JobId, progress: JobProgress) -> Result<()> {
        if !self.storage.update_progress(id, &progress).await? {
            warn!(job_id = %id, "job record missing from database");
        }
        self.memory.set(id, progress).await
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobProgress>> {
        if let Some(progress) = self.memory.get(id).await? {
            return Ok(Some(progress));
        }
        Ok(self.storage.get_job(id).await?.map(|record| record.progress))
    }

    async fn subscribe(&self, id: &JobId) -> Option<watch::Receiver<JobProgress>> {
        self.memory.subscribe(id).await
    }
}
