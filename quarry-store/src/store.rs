//! The shared store contract
//!
//! Every method is atomic on its own. Workers coordinate only through
//! [`Store::pop`]; nothing else in the engine assumes cross-call atomicity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_core::{FailureRecord, Payload, WorkerCounters, WorkingOnRecord};

use crate::error::StoreResult;

/// Global stat counter of processed jobs
pub const STAT_PROCESSED: &str = "processed";

/// Global stat counter of failed jobs
pub const STAT_FAILED: &str = "failed";

#[async_trait]
pub trait Store: Send + Sync {
    // Queues

    /// Append a payload to a queue, registering the queue name.
    async fn push(&self, queue: &str, payload: &Payload) -> StoreResult<()>;

    /// Remove and return the head of a queue without blocking.
    async fn pop(&self, queue: &str) -> StoreResult<Option<Payload>>;

    /// Known queue names, sorted.
    async fn queues(&self) -> StoreResult<Vec<String>>;

    async fn queue_size(&self, queue: &str) -> StoreResult<usize>;

    /// Up to `count` payloads starting at `start`, head first.
    async fn peek(&self, queue: &str, start: usize, count: usize) -> StoreResult<Vec<Payload>>;

    /// Forget a queue and drop its pending payloads.
    async fn remove_queue(&self, queue: &str) -> StoreResult<()>;

    async fn queue_payloads(&self, queue: &str) -> StoreResult<Vec<Payload>>;

    /// Remove every queued copy of `payload`, returning how many were removed.
    async fn remove_payload(&self, queue: &str, payload: &Payload) -> StoreResult<usize>;

    // Workers

    async fn register_worker(&self, id: &str) -> StoreResult<()>;

    async fn unregister_worker(&self, id: &str) -> StoreResult<()>;

    async fn workers(&self) -> StoreResult<Vec<String>>;

    async fn worker_exists(&self, id: &str) -> StoreResult<bool>;

    async fn set_working(&self, id: &str, record: &WorkingOnRecord) -> StoreResult<()>;

    async fn clear_working(&self, id: &str) -> StoreResult<()>;

    async fn get_working(&self, id: &str) -> StoreResult<Option<WorkingOnRecord>>;

    async fn set_started(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()>;

    async fn get_started(&self, id: &str) -> StoreResult<Option<DateTime<Utc>>>;

    async fn incr_processed(&self, id: &str) -> StoreResult<u64>;

    async fn incr_failed(&self, id: &str) -> StoreResult<u64>;

    async fn get_counters(&self, id: &str) -> StoreResult<WorkerCounters>;

    /// Drop a worker's counters and started timestamp.
    async fn clear_counters(&self, id: &str) -> StoreResult<()>;

    // Global stats

    async fn incr_stat(&self, name: &str) -> StoreResult<u64>;

    async fn get_stat(&self, name: &str) -> StoreResult<u64>;

    async fn clear_stat(&self, name: &str) -> StoreResult<()>;

    // Failures, index 0 is the oldest record

    async fn append_failure(&self, record: &FailureRecord) -> StoreResult<()>;

    async fn failure_count(&self) -> StoreResult<usize>;

    async fn failure_page(&self, offset: usize, limit: usize) -> StoreResult<Vec<FailureRecord>>;

    /// Overwrite the record at `index` in place.
    async fn failure_set(&self, index: usize, record: &FailureRecord) -> StoreResult<()>;

    async fn failure_remove(&self, index: usize) -> StoreResult<()>;

    async fn failure_clear(&self) -> StoreResult<()>;
}
