//! End-to-end worker lifecycle against the in-memory store

use quarry_core::error::{CANCELLED, DIRTY_EXIT};
use quarry_worker::{
    jobs, stats, ExecutionState, IsolationMode, JobClass, JobError, JobRegistry, MemoryStore,
    Payload, Store, Worker, WorkerOptions,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn options(isolation: IsolationMode) -> WorkerOptions {
    WorkerOptions {
        isolation,
        install_signal_handlers: false,
        poll_interval: Duration::from_millis(5),
        ..WorkerOptions::default()
    }
}

fn registry() -> JobRegistry {
    let registry = JobRegistry::new();
    registry.register_fn("GoodJob", |_args, _ctx| Ok(()));
    registry.register_fn("SlowJob", |_args, _ctx| {
        std::thread::sleep(Duration::from_millis(300));
        Ok(())
    });
    registry.register_fn("CooperativeJob", |_args, ctx| {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !ctx.is_cancelled() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        Err(JobError::cancelled())
    });
    registry
}

fn setup(queues: &[&str], isolation: IsolationMode) -> (Arc<MemoryStore>, Worker) {
    setup_with(queues, isolation, registry())
}

fn setup_with(
    queues: &[&str],
    isolation: IsolationMode,
    registry: JobRegistry,
) -> (Arc<MemoryStore>, Worker) {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::new(queues.iter().copied(), store.clone(), Arc::new(registry))
        .unwrap()
        .with_options(options(isolation));
    (store, worker)
}

#[tokio::test]
async fn test_good_job_round_trip_on_high() {
    let (store, worker) = setup(&["high"], IsolationMode::Thread);
    jobs::create(store.as_ref(), "high", "GoodJob", vec![json!(35), json!("tar")])
        .await
        .unwrap();

    let mut ran = Vec::new();
    worker
        .work_with(Duration::ZERO, |job| ran.push(job.class().to_string()))
        .await
        .unwrap();

    assert_eq!(ran, vec!["GoodJob"]);
    assert_eq!(store.queue_size("high").await.unwrap(), 0);
    assert_eq!(store.failure_count().await.unwrap(), 0);

    let info = stats::info(store.as_ref()).await.unwrap();
    assert_eq!(info.processed, 1);
    assert_eq!(info.failed, 0);
    assert_eq!(info.workers, 0);
    assert_eq!(worker.state(), ExecutionState::Idle);
}

#[tokio::test]
async fn test_failing_job_counts_once_and_hook_failure_is_swallowed() {
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&hook_calls);
    let hook: Arc<dyn quarry_worker::FailureObserver> =
        Arc::new(move |_error: &JobError, args: &[Value]| -> Result<(), JobError> {
            assert_eq!(args, [json!("boom")]);
            calls.fetch_add(1, Ordering::SeqCst);
            Err(JobError::new("HookError", "hook blew up"))
        });

    let registry = registry();
    registry.register(
        JobClass::new("BadJob")
            .with_executable(|args: &[Value], _ctx: &quarry_worker::JobContext| {
                Err(JobError::new("RuntimeError", format!("Bad job! {}", args[0])))
            })
            // One hook object under two names runs once.
            .with_failure_hook("on_failure_notify", Arc::clone(&hook))
            .with_failure_hook("on_failure_retry", hook),
    );

    let (store, worker) = setup_with(&["jobs"], IsolationMode::Thread, registry);
    store.push("jobs", &Payload::new("BadJob", vec![json!("boom")])).await.unwrap();

    let mut processed_seen = 0;
    worker
        .work_with(Duration::ZERO, |_job| processed_seen += 1)
        .await
        .unwrap();

    assert_eq!(processed_seen, 1);
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    let failures = worker.failures().all(0, 10).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].exception, "RuntimeError");
    assert_eq!(failures[0].error, "Bad job! \"boom\"");
    assert_eq!(failures[0].queue, "jobs");
    assert_eq!(failures[0].worker, worker.name());

    let info = stats::info(store.as_ref()).await.unwrap();
    assert_eq!(info.processed, 1);
    assert_eq!(info.failed, 1);
}

#[tokio::test]
async fn test_unknown_class_is_a_missing_capability_failure() {
    let (store, worker) = setup(&["jobs"], IsolationMode::Inline);
    store.push("jobs", &Payload::new("NoSuchJob", vec![])).await.unwrap();

    worker.work(Duration::ZERO).await.unwrap();

    let failures = worker.failures().all(0, 10).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].exception, "MissingCapabilityFailure");
}

#[tokio::test]
async fn test_status_is_visible_while_job_runs() {
    let (store, worker) = setup(&["high"], IsolationMode::Thread);
    store.push("high", &Payload::new("SlowJob", vec![])).await.unwrap();
    let worker = Arc::new(worker);

    let running = Arc::clone(&worker);
    let task = tokio::spawn(async move { running.work(Duration::ZERO).await });

    let deadline = Instant::now() + Duration::from_secs(5);
    while !worker.is_working().await.unwrap() {
        assert!(Instant::now() < deadline, "worker never picked up the job");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let store_dyn: Arc<dyn Store> = store.clone();
    assert!(Worker::exists(store_dyn.clone(), worker.name()).await.unwrap());
    let working = Worker::working(store_dyn.clone()).await.unwrap();
    assert_eq!(working.len(), 1);
    assert_eq!(working[0].job().await.unwrap().unwrap().class(), "SlowJob");
    assert!(worker.started().await.unwrap().is_some());
    assert_eq!(worker.job().await.unwrap().unwrap().queue, "high");

    task.await.unwrap().unwrap();
    assert!(Worker::all(store_dyn).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_graceful_shutdown_finishes_current_job() {
    let (store, worker) = setup(&["high"], IsolationMode::Thread);
    store.push("high", &Payload::new("SlowJob", vec![])).await.unwrap();
    store.push("high", &Payload::new("GoodJob", vec![])).await.unwrap();

    let handle = worker.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();
    });

    worker.work(Duration::from_millis(10)).await.unwrap();

    assert_eq!(store.get_stat("processed").await.unwrap(), 1);
    assert_eq!(store.queue_size("high").await.unwrap(), 1);
    assert_eq!(store.failure_count().await.unwrap(), 0);
    assert!(store.workers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_immediate_shutdown_without_term_child_records_dirty_exit() {
    let (store, worker) = setup(&["high"], IsolationMode::Thread);
    store.push("high", &Payload::new("SlowJob", vec![])).await.unwrap();

    let handle = worker.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown_now();
    });

    worker.work(Duration::from_millis(10)).await.unwrap();

    let failures = worker.failures().all(0, 10).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].exception, DIRTY_EXIT);
    assert!(store.workers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_immediate_shutdown_with_term_child_cancels_job() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::new(["high"], store.clone(), Arc::new(registry()))
        .unwrap()
        .with_options(WorkerOptions {
            term_child: true,
            term_timeout: Duration::from_secs(5),
            ..options(IsolationMode::Thread)
        });
    store.push("high", &Payload::new("CooperativeJob", vec![])).await.unwrap();

    let handle = worker.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown_now();
    });

    let started = Instant::now();
    worker.work(Duration::from_millis(10)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let failures = worker.failures().all(0, 10).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].exception, CANCELLED);
    assert_eq!(store.get_stat("failed").await.unwrap(), 1);
}

#[tokio::test]
async fn test_kill_child_keeps_worker_running() {
    let (store, worker) = setup(&["high"], IsolationMode::Thread);
    store.push("high", &Payload::new("SlowJob", vec![])).await.unwrap();
    store.push("high", &Payload::new("GoodJob", vec![])).await.unwrap();

    let handle = worker.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.kill_child();
    });

    worker.work(Duration::ZERO).await.unwrap();

    assert_eq!(store.queue_size("high").await.unwrap(), 0);
    assert_eq!(store.get_stat("processed").await.unwrap(), 2);
    assert_eq!(store.get_stat("failed").await.unwrap(), 1);
    let failures = worker.failures().all(0, 10).await.unwrap();
    assert_eq!(failures[0].exception, DIRTY_EXIT);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let (store, worker) = setup(&["high"], IsolationMode::Inline);
    store.push("high", &Payload::new("GoodJob", vec![])).await.unwrap();

    let handle = worker.shutdown_handle();
    handle.pause();
    let observer = store.clone();
    let driver = handle.clone();
    let check = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let untouched = observer.queue_size("high").await.unwrap();
        driver.resume();
        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.shutdown();
        untouched
    });

    worker.work(Duration::from_millis(10)).await.unwrap();
    assert_eq!(check.await.unwrap(), 1);
    assert_eq!(store.queue_size("high").await.unwrap(), 0);
}
