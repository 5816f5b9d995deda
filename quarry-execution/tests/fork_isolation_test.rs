#![cfg(unix)]

use quarry_core::{Job, JobError, JobHook, JobRegistry, Payload};
use quarry_execution::{ExecutionOutcome, ForkedJob, IsolatedJob, Launch};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static PARENT_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn registry() -> JobRegistry {
    let registry = JobRegistry::new();
    registry.register_fn("GoodJob", |_args, _ctx| Ok(()));
    registry.register_fn("BadJob", |args, _ctx| {
        Err(JobError::new("RuntimeError", format!("Bad job! {}", args.len())))
    });
    registry.register_fn("ExitJob", |_args, _ctx| std::process::exit(3));
    registry.register_fn("SleepJob", |_args, _ctx| {
        std::thread::sleep(Duration::from_secs(30));
        Ok(())
    });
    registry.register_fn("CooperativeJob", |_args, ctx| {
        let deadline = Instant::now() + Duration::from_secs(30);
        while !ctx.is_cancelled() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        Err(JobError::cancelled())
    });
    registry.register_fn("ControlCharJob", |_args, _ctx| {
        Err(JobError::new("RuntimeError", "\u{1}".repeat(40_000)))
    });
    registry.register_fn("LongKindJob", |_args, _ctx| {
        Err(JobError::new("K".repeat(70_000), "boom"))
    });
    registry.register_fn("CounterJob", |_args, _ctx| {
        PARENT_COUNTER.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    registry
}

fn launch(class: &str) -> Launch {
    let job = Job::new("jobs", Payload::new(class, vec![json!(1), json!("two")]));
    Launch::new(&registry(), &job, "host:1:jobs")
}

fn wait_for(job: &mut ForkedJob) -> ExecutionOutcome {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(outcome) = job.poll_exit().unwrap() {
            return outcome;
        }
        assert!(Instant::now() < deadline, "forked job did not exit");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn dirty_exit_message(outcome: ExecutionOutcome) -> String {
    match outcome {
        ExecutionOutcome::Failure(error) => {
            assert_eq!(error.kind, "DirtyExit");
            error.message
        }
        ExecutionOutcome::Success => panic!("expected a dirty exit"),
    }
}

#[test]
fn test_forked_success() {
    let mut job = ForkedJob::spawn(launch("GoodJob")).unwrap();
    assert_ne!(job.pid(), std::process::id());
    assert_eq!(wait_for(&mut job), ExecutionOutcome::Success);
}

#[test]
fn test_forked_failure_is_reported_through_pipe() {
    let mut job = ForkedJob::spawn(launch("BadJob")).unwrap();
    assert_eq!(
        wait_for(&mut job),
        ExecutionOutcome::Failure(JobError::new("RuntimeError", "Bad job! 2"))
    );
}

#[test]
fn test_exit_without_report_is_dirty() {
    let mut job = ForkedJob::spawn(launch("ExitJob")).unwrap();
    let message = dirty_exit_message(wait_for(&mut job));
    assert!(message.contains("exited with status 3"), "{}", message);
}

#[test]
fn test_killed_child_is_dirty_and_names_signal() {
    let mut job = ForkedJob::spawn(launch("SleepJob")).unwrap();
    job.kill().unwrap();
    let message = dirty_exit_message(wait_for(&mut job));
    assert!(message.contains("SIGKILL"), "{}", message);
}

#[test]
fn test_sigterm_sets_cancellation_flag_in_child() {
    let mut job = ForkedJob::spawn(launch("CooperativeJob")).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    job.terminate().unwrap();
    assert_eq!(wait_for(&mut job), ExecutionOutcome::Failure(JobError::cancelled()));
}

#[test]
fn test_child_memory_is_isolated() {
    let mut job = ForkedJob::spawn(launch("CounterJob")).unwrap();
    assert_eq!(wait_for(&mut job), ExecutionOutcome::Success);
    assert_eq!(PARENT_COUNTER.load(Ordering::SeqCst), 0);
}

#[test]
fn test_after_fork_runs_in_child() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("after_fork");
    let path = marker.clone();
    let hook: JobHook = Arc::new(move |job: &Job| {
        let line = format!("{}:{}", std::process::id(), job.class());
        std::fs::write(&path, line).unwrap();
    });

    let mut job = ForkedJob::spawn(launch("GoodJob").with_after_fork(Some(hook))).unwrap();
    let child_pid = job.pid();
    assert_eq!(wait_for(&mut job), ExecutionOutcome::Success);

    let written = std::fs::read_to_string(marker).unwrap();
    assert_eq!(written, format!("{}:GoodJob", child_pid));
}

#[test]
fn test_escaped_failure_is_reported_not_dirty() {
    let mut job = ForkedJob::spawn(launch("ControlCharJob")).unwrap();
    match wait_for(&mut job) {
        ExecutionOutcome::Failure(error) => {
            assert_eq!(error.kind, "RuntimeError");
            assert!(!error.message.is_empty());
            assert!(error.message.chars().all(|c| c == '\u{1}'));
        }
        ExecutionOutcome::Success => panic!("expected a failure"),
    }
}

#[test]
fn test_oversized_kind_is_reported_not_dirty() {
    let mut job = ForkedJob::spawn(launch("LongKindJob")).unwrap();
    match wait_for(&mut job) {
        ExecutionOutcome::Failure(error) => {
            assert!(error.kind.starts_with('K'));
            assert_eq!(error.message, "boom");
        }
        ExecutionOutcome::Success => panic!("expected a failure"),
    }
}
