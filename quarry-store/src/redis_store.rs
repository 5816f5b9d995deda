//! Redis-backed store using a Resque-compatible key layout
//!
//! Keys live under a namespace (default `resque`):
//!
//! - `<ns>:queues` set of queue names, `<ns>:queue:<name>` payload lists
//! - `<ns>:workers` set of worker ids, `<ns>:worker:<id>` working-on record,
//!   `<ns>:worker:<id>:started` start timestamp
//! - `<ns>:stat:<name>` global counters, `<ns>:stat:<name>:<id>` per worker
//! - `<ns>:failed` failure list, oldest record first
//!
//! Records are stored as JSON strings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_core::{FailureRecord, Payload, WorkerCounters, WorkingOnRecord};
use redis::aio::MultiplexedConnection;
use redis::Client;
use serde::de::DeserializeOwned;

use crate::error::{StoreError, StoreResult};
use crate::store::{Store, STAT_FAILED, STAT_PROCESSED};

/// Default key namespace
pub const DEFAULT_NAMESPACE: &str = "resque";

const REMOVED_SENTINEL: &str = "__quarry_removed__";

#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    namespace: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl RedisStore {
    /// Connect to `url` (for example `redis://localhost:6379`).
    pub async fn connect(url: &str, namespace: Option<&str>) -> StoreResult<Self> {
        let client =
            Client::open(url).map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE).to_string();
        tracing::info!(namespace = %namespace, "Connected to redis store");
        Ok(Self {
            connection,
            namespace,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.namespace, suffix)
    }

    fn queue_key(&self, queue: &str) -> String {
        self.key(&format!("queue:{}", queue))
    }

    fn worker_key(&self, id: &str) -> String {
        self.key(&format!("worker:{}", id))
    }

    fn started_key(&self, id: &str) -> String {
        self.key(&format!("worker:{}:started", id))
    }

    fn worker_stat_key(&self, stat: &str, id: &str) -> String {
        self.key(&format!("stat:{}:{}", stat, id))
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    fn decode_all<T: DeserializeOwned>(raw: Vec<String>) -> StoreResult<Vec<T>> {
        raw.iter()
            .map(|item| serde_json::from_str(item).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn push(&self, queue: &str, payload: &Payload) -> StoreResult<()> {
        let encoded = serde_json::to_string(payload)?;
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(self.key("queues"))
            .arg(queue)
            .ignore()
            .cmd("RPUSH")
            .arg(self.queue_key(queue))
            .arg(encoded)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop(&self, queue: &str) -> StoreResult<Option<Payload>> {
        let mut conn = self.conn();
        let raw: Option<String> = redis::cmd("LPOP")
            .arg(self.queue_key(queue))
            .query_async(&mut conn)
            .await?;
        let Some(item) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&item) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => Err(StoreError::MalformedPayload {
                queue: queue.to_string(),
                message: e.to_string(),
                raw: item,
            }),
        }
    }

    async fn queues(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let mut names: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.key("queues"))
            .query_async(&mut conn)
            .await?;
        names.sort();
        Ok(names)
    }

    async fn queue_size(&self, queue: &str) -> StoreResult<usize> {
        let mut conn = self.conn();
        Ok(redis::cmd("LLEN")
            .arg(self.queue_key(queue))
            .query_async(&mut conn)
            .await?)
    }

    async fn peek(&self, queue: &str, start: usize, count: usize) -> StoreResult<Vec<Payload>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(self.queue_key(queue))
            .arg(start)
            .arg(start + count - 1)
            .query_async(&mut conn)
            .await?;
        Self::decode_all(raw)
    }

    async fn remove_queue(&self, queue: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .cmd("SREM")
            .arg(self.key("queues"))
            .arg(queue)
            .ignore()
            .cmd("DEL")
            .arg(self.queue_key(queue))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn queue_payloads(&self, queue: &str) -> StoreResult<Vec<Payload>> {
        let mut conn = self.conn();
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(self.queue_key(queue))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        Self::decode_all(raw)
    }

    async fn remove_payload(&self, queue: &str, payload: &Payload) -> StoreResult<usize> {
        let encoded = serde_json::to_string(payload)?;
        let mut conn = self.conn();
        Ok(redis::cmd("LREM")
            .arg(self.queue_key(queue))
            .arg(0)
            .arg(encoded)
            .query_async(&mut conn)
            .await?)
    }

    async fn register_worker(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        redis::cmd("SADD")
            .arg(self.key("workers"))
            .arg(id)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn unregister_worker(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        redis::cmd("SREM")
            .arg(self.key("workers"))
            .arg(id)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn workers(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let mut ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.key("workers"))
            .query_async(&mut conn)
            .await?;
        ids.sort();
        Ok(ids)
    }

    async fn worker_exists(&self, id: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        Ok(redis::cmd("SISMEMBER")
            .arg(self.key("workers"))
            .arg(id)
            .query_async(&mut conn)
            .await?)
    }

    async fn set_working(&self, id: &str, record: &WorkingOnRecord) -> StoreResult<()> {
        let encoded = serde_json::to_string(record)?;
        let mut conn = self.conn();
        redis::cmd("SET")
            .arg(self.worker_key(id))
            .arg(encoded)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear_working(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        redis::cmd("DEL")
            .arg(self.worker_key(id))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_working(&self, id: &str) -> StoreResult<Option<WorkingOnRecord>> {
        let mut conn = self.conn();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.worker_key(id))
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(item) => Ok(Some(serde_json::from_str(&item)?)),
            None => Ok(None),
        }
    }

    async fn set_started(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut conn = self.conn();
        redis::cmd("SET")
            .arg(self.started_key(id))
            .arg(at.to_rfc3339())
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_started(&self, id: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let mut conn = self.conn();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.started_key(id))
            .query_async(&mut conn)
            .await?;
        raw.map(|value| {
            DateTime::parse_from_rfc3339(&value)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| StoreError::CommandFailed(format!("invalid started time: {}", e)))
        })
        .transpose()
    }

    async fn incr_processed(&self, id: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        Ok(redis::cmd("INCR")
            .arg(self.worker_stat_key(STAT_PROCESSED, id))
            .query_async(&mut conn)
            .await?)
    }

    async fn incr_failed(&self, id: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        Ok(redis::cmd("INCR")
            .arg(self.worker_stat_key(STAT_FAILED, id))
            .query_async(&mut conn)
            .await?)
    }

    async fn get_counters(&self, id: &str) -> StoreResult<WorkerCounters> {
        let mut conn = self.conn();
        let (processed, failed): (Option<u64>, Option<u64>) = redis::cmd("MGET")
            .arg(self.worker_stat_key(STAT_PROCESSED, id))
            .arg(self.worker_stat_key(STAT_FAILED, id))
            .query_async(&mut conn)
            .await?;
        Ok(WorkerCounters {
            processed: processed.unwrap_or(0),
            failed: failed.unwrap_or(0),
        })
    }

    async fn clear_counters(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        redis::cmd("DEL")
            .arg(self.worker_stat_key(STAT_PROCESSED, id))
            .arg(self.worker_stat_key(STAT_FAILED, id))
            .arg(self.started_key(id))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn incr_stat(&self, name: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        Ok(redis::cmd("INCR")
            .arg(self.key(&format!("stat:{}", name)))
            .query_async(&mut conn)
            .await?)
    }

    async fn get_stat(&self, name: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        let value: Option<u64> = redis::cmd("GET")
            .arg(self.key(&format!("stat:{}", name)))
            .query_async(&mut conn)
            .await?;
        Ok(value.unwrap_or(0))
    }

    async fn clear_stat(&self, name: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        redis::cmd("DEL")
            .arg(self.key(&format!("stat:{}", name)))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn append_failure(&self, record: &FailureRecord) -> StoreResult<()> {
        let encoded = serde_json::to_string(record)?;
        let mut conn = self.conn();
        redis::cmd("RPUSH")
            .arg(self.key("failed"))
            .arg(encoded)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn failure_count(&self) -> StoreResult<usize> {
        let mut conn = self.conn();
        Ok(redis::cmd("LLEN")
            .arg(self.key("failed"))
            .query_async(&mut conn)
            .await?)
    }

    async fn failure_page(&self, offset: usize, limit: usize) -> StoreResult<Vec<FailureRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(self.key("failed"))
            .arg(offset)
            .arg(offset + limit - 1)
            .query_async(&mut conn)
            .await?;
        Self::decode_all(raw)
    }

    async fn failure_set(&self, index: usize, record: &FailureRecord) -> StoreResult<()> {
        let len = self.failure_count().await?;
        if index >= len {
            return Err(StoreError::IndexOutOfRange { index, len });
        }
        let encoded = serde_json::to_string(record)?;
        let mut conn = self.conn();
        redis::cmd("LSET")
            .arg(self.key("failed"))
            .arg(index)
            .arg(encoded)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn failure_remove(&self, index: usize) -> StoreResult<()> {
        let len = self.failure_count().await?;
        if index >= len {
            return Err(StoreError::IndexOutOfRange { index, len });
        }
        // Lists have no remove-by-index, so overwrite the slot and drop it by value.
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .cmd("LSET")
            .arg(self.key("failed"))
            .arg(index)
            .arg(REMOVED_SENTINEL)
            .ignore()
            .cmd("LREM")
            .arg(self.key("failed"))
            .arg(1)
            .arg(REMOVED_SENTINEL)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn failure_clear(&self) -> StoreResult<()> {
        let mut conn = self.conn();
        redis::cmd("DEL")
            .arg(self.key("failed"))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}
