//! Failure tracker
//!
//! Records live in the store's append-only failure list. Index 0 is the
//! oldest record; every positional operation here uses that order.

use quarry_core::FailureRecord;
use quarry_store::{Store, StoreError, StoreResult};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct FailureTracker {
    store: Arc<dyn Store>,
}

impl FailureTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append a record. Store errors are logged, never raised.
    pub async fn create(&self, record: &FailureRecord) {
        if let Err(e) = self.store.append_failure(record).await {
            error!(
                worker = %record.worker,
                queue = %record.queue,
                class = %record.payload.class,
                error = %e,
                "Failed to record job failure"
            );
        }
    }

    pub async fn count(&self) -> StoreResult<usize> {
        self.store.failure_count().await
    }

    /// Page of records, oldest first
    pub async fn all(&self, offset: usize, limit: usize) -> StoreResult<Vec<FailureRecord>> {
        self.store.failure_page(offset, limit).await
    }

    pub async fn clear(&self) -> StoreResult<()> {
        self.store.failure_clear().await
    }

    /// Distinct queue names with at least one failure
    pub async fn queues(&self) -> StoreResult<Vec<String>> {
        let names: BTreeSet<String> = self
            .snapshot()
            .await?
            .into_iter()
            .map(|record| record.queue)
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Push the payload of every record from `queue` back onto it and stamp
    /// the records as retried. Returns the number requeued.
    ///
    /// Each record is located again before it is written, so a concurrent
    /// removal shifting the list never redirects the update to another record.
    pub async fn requeue_queue(&self, queue: &str) -> StoreResult<usize> {
        let mut requeued = 0;
        for (hint, record) in self.snapshot().await?.into_iter().enumerate() {
            if record.queue != queue {
                continue;
            }
            let Some(index) = self.locate(hint, &record).await? else {
                debug!(queue, hint, "Failure record vanished before requeue");
                continue;
            };
            let mut record = record;
            self.store.push(&record.queue, &record.payload).await?;
            record.mark_retried();
            self.store.failure_set(index, &record).await?;
            requeued += 1;
        }
        info!(queue, requeued, "Requeued failed jobs");
        Ok(requeued)
    }

    /// Delete every record from `queue`. Returns the number removed.
    pub async fn remove_queue(&self, queue: &str) -> StoreResult<usize> {
        let targets: Vec<(usize, FailureRecord)> = self
            .snapshot()
            .await?
            .into_iter()
            .enumerate()
            .filter(|(_, record)| record.queue == queue)
            .collect();

        let mut removed = 0;
        // Highest index first so earlier positions stay valid.
        for (hint, record) in targets.iter().rev() {
            match self.locate(*hint, record).await? {
                Some(index) => {
                    self.store.failure_remove(index).await?;
                    removed += 1;
                }
                None => debug!(queue, hint, "Failure record vanished before removal"),
            }
        }
        info!(queue, removed, "Removed failed jobs");
        Ok(removed)
    }

    /// Requeue the record at `index`
    pub async fn requeue(&self, index: usize) -> StoreResult<FailureRecord> {
        let mut record = self.get(index).await?;
        self.store.push(&record.queue, &record.payload).await?;
        record.mark_retried();
        self.store.failure_set(index, &record).await?;
        Ok(record)
    }

    /// Remove the record at `index`
    pub async fn remove(&self, index: usize) -> StoreResult<()> {
        self.get(index).await?;
        self.store.failure_remove(index).await
    }

    async fn get(&self, index: usize) -> StoreResult<FailureRecord> {
        let len = self.store.failure_count().await?;
        self.store
            .failure_page(index, 1)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::IndexOutOfRange { index, len })
    }

    /// Current index of `expected`, trying `hint` before rescanning.
    async fn locate(&self, hint: usize, expected: &FailureRecord) -> StoreResult<Option<usize>> {
        let at_hint = self.store.failure_page(hint, 1).await?;
        if at_hint.first() == Some(expected) {
            return Ok(Some(hint));
        }
        Ok(self
            .snapshot()
            .await?
            .iter()
            .position(|record| record == expected))
    }

    async fn snapshot(&self) -> StoreResult<Vec<FailureRecord>> {
        let count = self.store.failure_count().await?;
        self.store.failure_page(0, count).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{JobError, Payload};
    use quarry_store::MemoryStore;
    use serde_json::json;

    fn record(queue: &str, n: i64) -> FailureRecord {
        FailureRecord::new(
            &JobError::new("RuntimeError", format!("failure {}", n)),
            Payload::new("BadJob", vec![json!(n)]),
            queue,
            "host:1:*",
        )
    }

    async fn seeded() -> (Arc<MemoryStore>, FailureTracker) {
        let store = Arc::new(MemoryStore::new());
        let tracker = FailureTracker::new(store.clone());
        tracker.create(&record("high", 0)).await;
        tracker.create(&record("low", 1)).await;
        tracker.create(&record("high", 2)).await;
        (store, tracker)
    }

    #[tokio::test]
    async fn test_all_pages_oldest_first() {
        let (_store, tracker) = seeded().await;
        assert_eq!(tracker.count().await.unwrap(), 3);

        let page = tracker.all(1, 5).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].error, "failure 1");
        assert_eq!(page[1].error, "failure 2");
    }

    #[tokio::test]
    async fn test_requeue_queue_pushes_and_stamps() {
        let (store, tracker) = seeded().await;

        assert_eq!(tracker.requeue_queue("high").await.unwrap(), 2);
        assert_eq!(store.queue_size("high").await.unwrap(), 2);
        assert_eq!(store.queue_size("low").await.unwrap(), 0);

        let records = tracker.all(0, 10).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].is_retried());
        assert!(!records[1].is_retried());
        assert!(records[2].is_retried());
    }

    #[tokio::test]
    async fn test_remove_queue_keeps_others_in_order() {
        let (_store, tracker) = seeded().await;
        tracker.create(&record("low", 3)).await;

        assert_eq!(tracker.remove_queue("high").await.unwrap(), 2);
        let remaining: Vec<String> = tracker
            .all(0, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.error)
            .collect();
        assert_eq!(remaining, vec!["failure 1", "failure 3"]);
    }

    #[tokio::test]
    async fn test_requeue_and_remove_by_index() {
        let (store, tracker) = seeded().await;

        let requeued = tracker.requeue(1).await.unwrap();
        assert!(requeued.is_retried());
        assert_eq!(store.pop("low").await.unwrap(), Some(requeued.payload.clone()));

        tracker.remove(0).await.unwrap();
        assert_eq!(tracker.count().await.unwrap(), 2);
        assert!(matches!(
            tracker.remove(7).await,
            Err(StoreError::IndexOutOfRange { index: 7, len: 2 })
        ));
    }

    #[tokio::test]
    async fn test_queues_and_clear() {
        let (_store, tracker) = seeded().await;
        assert_eq!(tracker.queues().await.unwrap(), vec!["high", "low"]);

        tracker.clear().await.unwrap();
        assert_eq!(tracker.count().await.unwrap(), 0);
        assert!(tracker.queues().await.unwrap().is_empty());
    }
}
