//! Redis backend tests. Run with a local server:
//! `QUARRY_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test -p quarry-store --features redis -- --ignored`
#![cfg(feature = "redis")]

use quarry_core::{FailureRecord, Job, JobError, Payload};
use quarry_store::{RedisStore, Store};
use serde_json::json;

async fn connect(namespace: &str) -> RedisStore {
    let url = std::env::var("QUARRY_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let store = RedisStore::connect(&url, Some(namespace)).await.unwrap();
    for queue in store.queues().await.unwrap() {
        store.remove_queue(&queue).await.unwrap();
    }
    store.failure_clear().await.unwrap();
    store
}

#[tokio::test]
#[ignore = "requires a running redis server"]
async fn test_redis_queue_round_trip() {
    let store = connect("quarry-test-queues").await;
    let payload = Payload::new("GoodJob", vec![json!(1)]);

    store.push("high", &payload).await.unwrap();
    assert_eq!(store.queues().await.unwrap(), vec!["high".to_string()]);
    assert_eq!(store.queue_size("high").await.unwrap(), 1);
    assert_eq!(store.pop("high").await.unwrap(), Some(payload));
    assert_eq!(store.pop("high").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires a running redis server"]
async fn test_redis_worker_state() {
    let store = connect("quarry-test-workers").await;
    let id = "host:4242:high";
    let job = Job::new("high", Payload::new("GoodJob", vec![]));

    store.register_worker(id).await.unwrap();
    store.set_working(id, &job.working_on()).await.unwrap();
    store.incr_processed(id).await.unwrap();

    assert!(store.worker_exists(id).await.unwrap());
    assert_eq!(store.get_working(id).await.unwrap(), Some(job.working_on()));
    assert_eq!(store.get_counters(id).await.unwrap().processed, 1);

    store.clear_working(id).await.unwrap();
    store.clear_counters(id).await.unwrap();
    store.unregister_worker(id).await.unwrap();
    assert!(!store.worker_exists(id).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a running redis server"]
async fn test_redis_failure_remove_by_index() {
    let store = connect("quarry-test-failures").await;
    for queue in ["a", "b", "c"] {
        let record = FailureRecord::new(
            &JobError::new("E", "m"),
            Payload::new("BadJob", vec![]),
            queue,
            "host:1:*",
        );
        store.append_failure(&record).await.unwrap();
    }

    store.failure_remove(1).await.unwrap();
    let queues: Vec<String> = store
        .failure_page(0, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.queue)
        .collect();
    assert_eq!(queues, vec!["a", "c"]);
}
