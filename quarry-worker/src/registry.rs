//! Worker registry and crash recovery
//!
//! A registered worker is visible to other processes through the store:
//! its id in the worker set, an optional working-on record, per-worker
//! counters and a start timestamp.

use chrono::{DateTime, Utc};
use quarry_core::{FailureRecord, Job, JobError, WorkerId, WorkingOnRecord};
use quarry_resilience::ProcessProbe;
use quarry_store::{Store, StoreResult, STAT_FAILED, STAT_PROCESSED};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::failure::FailureTracker;

/// Read-only view of a registered worker
#[derive(Clone)]
pub struct WorkerInfo {
    id: String,
    store: Arc<dyn Store>,
}

impl WorkerInfo {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Parsed identity, `None` for ids written by foreign tooling
    pub fn worker_id(&self) -> Option<WorkerId> {
        WorkerId::from_str(&self.id).ok()
    }

    /// The job this worker is currently running
    pub async fn job(&self) -> StoreResult<Option<Job>> {
        Ok(self.store.get_working(&self.id).await?.map(Job::from))
    }

    pub async fn is_working(&self) -> StoreResult<bool> {
        Ok(self.store.get_working(&self.id).await?.is_some())
    }

    pub async fn is_idle(&self) -> StoreResult<bool> {
        Ok(!self.is_working().await?)
    }

    pub async fn processed(&self) -> StoreResult<u64> {
        Ok(self.store.get_counters(&self.id).await?.processed)
    }

    pub async fn failed(&self) -> StoreResult<u64> {
        Ok(self.store.get_counters(&self.id).await?.failed)
    }

    pub async fn started(&self) -> StoreResult<Option<DateTime<Utc>>> {
        self.store.get_started(&self.id).await
    }
}

impl std::fmt::Debug for WorkerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerInfo").field("id", &self.id).finish()
    }
}

#[derive(Clone)]
pub struct WorkerRegistry {
    store: Arc<dyn Store>,
    failures: FailureTracker,
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let failures = FailureTracker::new(Arc::clone(&store));
        Self { store, failures }
    }

    pub async fn register(&self, id: &str) -> StoreResult<()> {
        self.store.register_worker(id).await?;
        self.store.set_started(id, Utc::now()).await?;
        info!(worker = id, "Registered worker");
        Ok(())
    }

    /// Remove a worker and its state. A job still marked as running is
    /// recorded as a dirty exit.
    pub async fn unregister(&self, id: &str) -> StoreResult<()> {
        if let Some(record) = self.store.get_working(id).await? {
            warn!(worker = id, queue = %record.queue, class = %record.payload.class, "Worker exited with a job in progress");
            self.record_dirty_exit(id, record, "Worker exited while the job was running")
                .await;
        }

        self.store.clear_working(id).await?;
        self.store.clear_counters(id).await?;
        self.store.unregister_worker(id).await?;
        info!(worker = id, "Unregistered worker");
        Ok(())
    }

    pub async fn set_working(&self, id: &str, job: &Job) -> StoreResult<()> {
        self.store.set_working(id, &job.working_on()).await
    }

    pub async fn clear_working(&self, id: &str) -> StoreResult<()> {
        self.store.clear_working(id).await
    }

    /// Count a finished job for the worker and globally
    pub async fn record_processed(&self, id: &str) -> StoreResult<()> {
        self.store.incr_processed(id).await?;
        self.store.incr_stat(STAT_PROCESSED).await?;
        Ok(())
    }

    /// Count a failed job for the worker and globally
    pub async fn record_failed(&self, id: &str) -> StoreResult<()> {
        self.store.incr_failed(id).await?;
        self.store.incr_stat(STAT_FAILED).await?;
        Ok(())
    }

    pub async fn exists(&self, id: &str) -> StoreResult<bool> {
        self.store.worker_exists(id).await
    }

    pub async fn find(&self, id: &str) -> StoreResult<Option<WorkerInfo>> {
        if !self.exists(id).await? {
            return Ok(None);
        }
        Ok(Some(self.view(id)))
    }

    pub async fn all(&self) -> StoreResult<Vec<WorkerInfo>> {
        Ok(self
            .store
            .workers()
            .await?
            .into_iter()
            .map(|id| self.view(&id))
            .collect())
    }

    /// Registered workers that currently hold a job
    pub async fn working(&self) -> StoreResult<Vec<WorkerInfo>> {
        let mut busy = Vec::new();
        for worker in self.all().await? {
            if worker.is_working().await? {
                busy.push(worker);
            }
        }
        Ok(busy)
    }

    /// Remove registrations left behind by dead processes on this host.
    ///
    /// `own_id` is never pruned, nor are workers of other hosts. Returns the
    /// ids that were removed.
    pub async fn prune_dead_workers(
        &self,
        own_id: &WorkerId,
        probe: &dyn ProcessProbe,
    ) -> StoreResult<Vec<String>> {
        let own = own_id.to_string();
        let mut pruned = Vec::new();

        for id in self.store.workers().await? {
            if id == own {
                continue;
            }
            let Ok(worker) = WorkerId::from_str(&id) else {
                debug!(worker = %id, "Skipping unparseable worker id");
                continue;
            };
            if worker.host != own_id.host || worker.pid == own_id.pid {
                continue;
            }
            if probe.is_alive(worker.pid) {
                continue;
            }

            info!(worker = %id, pid = worker.pid, "Pruning dead worker");
            if let Some(record) = self.store.get_working(&id).await? {
                self.record_dirty_exit(&id, record, "Worker process died while the job was running")
                    .await;
            }
            self.store.clear_working(&id).await?;
            self.store.clear_counters(&id).await?;
            self.store.unregister_worker(&id).await?;
            pruned.push(id);
        }
        Ok(pruned)
    }

    /// View of `id` without checking that it is registered
    pub fn view(&self, id: &str) -> WorkerInfo {
        WorkerInfo {
            id: id.to_string(),
            store: Arc::clone(&self.store),
        }
    }

    async fn record_dirty_exit(&self, id: &str, record: WorkingOnRecord, message: &str) {
        let error = JobError::dirty_exit(message);
        let failure = FailureRecord::new(&error, record.payload, record.queue, id);
        self.failures.create(&failure).await;
    }
}
