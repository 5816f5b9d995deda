//! Store-wide summary

use quarry_store::{Store, StoreResult, STAT_FAILED, STAT_PROCESSED};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    /// Jobs waiting across every known queue
    pub pending: usize,
    pub processed: u64,
    pub failed: u64,
    pub queues: usize,
    pub workers: usize,
    pub working: usize,
}

pub async fn info(store: &dyn Store) -> StoreResult<Info> {
    let queues = store.queues().await?;
    let mut pending = 0;
    for queue in &queues {
        pending += store.queue_size(queue).await?;
    }

    let workers = store.workers().await?;
    let mut working = 0;
    for id in &workers {
        if store.get_working(id).await?.is_some() {
            working += 1;
        }
    }

    Ok(Info {
        pending,
        processed: store.get_stat(STAT_PROCESSED).await?,
        failed: store.get_stat(STAT_FAILED).await?,
        queues: queues.len(),
        workers: workers.len(),
        working,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{Job, Payload};
    use quarry_store::MemoryStore;

    #[tokio::test]
    async fn test_info_summarises_store() {
        let store = MemoryStore::new();
        store.push("high", &Payload::new("A", vec![])).await.unwrap();
        store.push("high", &Payload::new("B", vec![])).await.unwrap();
        store.push("low", &Payload::new("C", vec![])).await.unwrap();
        store.register_worker("host:1:high").await.unwrap();
        store.register_worker("host:2:low").await.unwrap();
        let job = Job::new("low", Payload::new("C", vec![]));
        store.set_working("host:2:low", &job.working_on()).await.unwrap();
        store.incr_stat(STAT_PROCESSED).await.unwrap();
        store.incr_stat(STAT_FAILED).await.unwrap();

        let info = info(&store).await.unwrap();
        assert_eq!(
            info,
            Info {
                pending: 3,
                processed: 1,
                failed: 1,
                queues: 2,
                workers: 2,
                working: 1,
            }
        );
    }
}
