//! In-process store backed by a single mutex

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quarry_core::{FailureRecord, Payload, WorkerCounters, WorkingOnRecord};
use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::error::{StoreError, StoreResult};
use crate::store::Store;

#[derive(Debug, Default)]
struct State {
    queues: BTreeSet<String>,
    lists: HashMap<String, VecDeque<Payload>>,
    workers: BTreeSet<String>,
    working: HashMap<String, WorkingOnRecord>,
    started: HashMap<String, DateTime<Utc>>,
    counters: HashMap<String, WorkerCounters>,
    stats: HashMap<String, u64>,
    failures: Vec<FailureRecord>,
}

/// Store shared by workers of one process
///
/// Every operation takes the lock once, which makes each call atomic with
/// respect to every other worker using the same instance.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn push(&self, queue: &str, payload: &Payload) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.queues.insert(queue.to_string());
        state
            .lists
            .entry(queue.to_string())
            .or_default()
            .push_back(payload.clone());
        Ok(())
    }

    async fn pop(&self, queue: &str) -> StoreResult<Option<Payload>> {
        let mut state = self.state.lock();
        Ok(state.lists.get_mut(queue).and_then(VecDeque::pop_front))
    }

    async fn queues(&self) -> StoreResult<Vec<String>> {
        Ok(self.state.lock().queues.iter().cloned().collect())
    }

    async fn queue_size(&self, queue: &str) -> StoreResult<usize> {
        Ok(self.state.lock().lists.get(queue).map_or(0, VecDeque::len))
    }

    async fn peek(&self, queue: &str, start: usize, count: usize) -> StoreResult<Vec<Payload>> {
        let state = self.state.lock();
        Ok(state
            .lists
            .get(queue)
            .map(|list| list.iter().skip(start).take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_queue(&self, queue: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.queues.remove(queue);
        state.lists.remove(queue);
        Ok(())
    }

    async fn queue_payloads(&self, queue: &str) -> StoreResult<Vec<Payload>> {
        let state = self.state.lock();
        Ok(state
            .lists
            .get(queue)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_payload(&self, queue: &str, payload: &Payload) -> StoreResult<usize> {
        let mut state = self.state.lock();
        let Some(list) = state.lists.get_mut(queue) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|queued| queued != payload);
        Ok(before - list.len())
    }

    async fn register_worker(&self, id: &str) -> StoreResult<()> {
        self.state.lock().workers.insert(id.to_string());
        Ok(())
    }

    async fn unregister_worker(&self, id: &str) -> StoreResult<()> {
        self.state.lock().workers.remove(id);
        Ok(())
    }

    async fn workers(&self) -> StoreResult<Vec<String>> {
        Ok(self.state.lock().workers.iter().cloned().collect())
    }

    async fn worker_exists(&self, id: &str) -> StoreResult<bool> {
        Ok(self.state.lock().workers.contains(id))
    }

    async fn set_working(&self, id: &str, record: &WorkingOnRecord) -> StoreResult<()> {
        self.state
            .lock()
            .working
            .insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn clear_working(&self, id: &str) -> StoreResult<()> {
        self.state.lock().working.remove(id);
        Ok(())
    }

    async fn get_working(&self, id: &str) -> StoreResult<Option<WorkingOnRecord>> {
        Ok(self.state.lock().working.get(id).cloned())
    }

    async fn set_started(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.state.lock().started.insert(id.to_string(), at);
        Ok(())
    }

    async fn get_started(&self, id: &str) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.state.lock().started.get(id).copied())
    }

    async fn incr_processed(&self, id: &str) -> StoreResult<u64> {
        let mut state = self.state.lock();
        let counters = state.counters.entry(id.to_string()).or_default();
        counters.processed += 1;
        Ok(counters.processed)
    }

    async fn incr_failed(&self, id: &str) -> StoreResult<u64> {
        let mut state = self.state.lock();
        let counters = state.counters.entry(id.to_string()).or_default();
        counters.failed += 1;
        Ok(counters.failed)
    }

    async fn get_counters(&self, id: &str) -> StoreResult<WorkerCounters> {
        Ok(self
            .state
            .lock()
            .counters
            .get(id)
            .copied()
            .unwrap_or_default())
    }

    async fn clear_counters(&self, id: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.counters.remove(id);
        state.started.remove(id);
        Ok(())
    }

    async fn incr_stat(&self, name: &str) -> StoreResult<u64> {
        let mut state = self.state.lock();
        let value = state.stats.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn get_stat(&self, name: &str) -> StoreResult<u64> {
        Ok(self.state.lock().stats.get(name).copied().unwrap_or(0))
    }

    async fn clear_stat(&self, name: &str) -> StoreResult<()> {
        self.state.lock().stats.remove(name);
        Ok(())
    }

    async fn append_failure(&self, record: &FailureRecord) -> StoreResult<()> {
        self.state.lock().failures.push(record.clone());
        Ok(())
    }

    async fn failure_count(&self) -> StoreResult<usize> {
        Ok(self.state.lock().failures.len())
    }

    async fn failure_page(&self, offset: usize, limit: usize) -> StoreResult<Vec<FailureRecord>> {
        let state = self.state.lock();
        Ok(state
            .failures
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn failure_set(&self, index: usize, record: &FailureRecord) -> StoreResult<()> {
        let mut state = self.state.lock();
        let len = state.failures.len();
        let slot = state
            .failures
            .get_mut(index)
            .ok_or(StoreError::IndexOutOfRange { index, len })?;
        *slot = record.clone();
        Ok(())
    }

    async fn failure_remove(&self, index: usize) -> StoreResult<()> {
        let mut state = self.state.lock();
        let len = state.failures.len();
        if index >= len {
            return Err(StoreError::IndexOutOfRange { index, len });
        }
        state.failures.remove(index);
        Ok(())
    }

    async fn failure_clear(&self) -> StoreResult<()> {
        self.state.lock().failures.clear();
        Ok(())
    }
}
