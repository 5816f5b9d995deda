//! Core executor traits and launch description

use quarry_core::{CancelFlag, Executable, IsolationMode, Job, JobContext, JobError, JobHook, JobRegistry};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

use crate::error::ExecutionError;

/// Result of one job run as seen by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    Failure(JobError),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }
}

/// A job running in some isolated context
///
/// All methods are non-blocking; the supervisor polls `poll_exit` between
/// waits on shutdown events.
pub trait IsolatedJob: Send {
    /// Process id hosting the job.
    fn pid(&self) -> u32;

    /// `Some` once the isolated context has fully exited.
    fn poll_exit(&mut self) -> Result<Option<ExecutionOutcome>, ExecutionError>;

    /// Ask the job to stop. Job logic observes this via its cancel flag.
    fn terminate(&mut self) -> Result<(), ExecutionError>;

    /// Stop the job without cooperation.
    fn kill(&mut self) -> Result<(), ExecutionError>;
}

/// Everything an isolated context needs to run one job
///
/// The class capability is resolved in the worker before isolation, so the
/// isolated context never touches the registry.
pub struct Launch {
    pub job: Job,
    pub worker: String,
    pub executable: Result<Arc<dyn Executable>, JobError>,
    pub after_fork: Option<JobHook>,
}

impl Launch {
    pub fn new(registry: &JobRegistry, job: &Job, worker: impl Into<String>) -> Self {
        Self {
            job: job.clone(),
            worker: worker.into(),
            executable: registry.resolve(job.class()),
            after_fork: None,
        }
    }

    pub fn with_after_fork(mut self, hook: Option<JobHook>) -> Self {
        self.after_fork = hook;
        self
    }

    /// Run `after_fork` and the job on the current thread, containing panics.
    pub fn run(self, cancel: CancelFlag) -> ExecutionOutcome {
        let Launch {
            job,
            worker,
            executable,
            after_fork,
        } = self;

        let result = catch_unwind(AssertUnwindSafe(|| {
            if let Some(hook) = &after_fork {
                hook(&job);
            }
            let executable = executable?;
            let ctx = JobContext::new(&job, worker, cancel);
            executable.perform(job.args(), &ctx)
        }));

        match result {
            Ok(Ok(())) => ExecutionOutcome::Success,
            Ok(Err(error)) => ExecutionOutcome::Failure(error),
            Err(panic) => ExecutionOutcome::Failure(JobError::from_panic(panic.as_ref())),
        }
    }
}

/// A job that already ran on the worker's own task
#[derive(Debug)]
pub struct InlineJob {
    outcome: Option<ExecutionOutcome>,
}

impl InlineJob {
    pub fn run(launch: Launch) -> Self {
        Self {
            outcome: Some(launch.run(CancelFlag::new())),
        }
    }
}

impl IsolatedJob for InlineJob {
    fn pid(&self) -> u32 {
        std::process::id()
    }

    fn poll_exit(&mut self) -> Result<Option<ExecutionOutcome>, ExecutionError> {
        Ok(self.outcome.take())
    }

    fn terminate(&mut self) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn kill(&mut self) -> Result<(), ExecutionError> {
        Ok(())
    }
}

/// Start `launch` in the context selected by `mode`.
pub fn spawn_isolated(
    mode: IsolationMode,
    launch: Launch,
) -> Result<Box<dyn IsolatedJob>, ExecutionError> {
    debug!(mode = %mode, class = %launch.job.class(), queue = %launch.job.queue, "Dispatching job");
    match mode {
        #[cfg(unix)]
        IsolationMode::Fork => Ok(Box::new(crate::fork::ForkedJob::spawn(launch)?)),
        #[cfg(not(unix))]
        IsolationMode::Fork => {
            tracing::warn!("Fork isolation is unavailable on this platform, using a thread");
            Ok(Box::new(crate::thread::ThreadJob::spawn(launch)?))
        }
        IsolationMode::Thread => Ok(Box::new(crate::thread::ThreadJob::spawn(launch)?)),
        IsolationMode::Inline => Ok(Box::new(InlineJob::run(launch))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::error::{MISSING_CAPABILITY, PANIC};
    use quarry_core::Payload;
    use serde_json::json;

    fn registry() -> JobRegistry {
        let registry = JobRegistry::new();
        registry.register_fn("GoodJob", |_args, _ctx| Ok(()));
        registry.register_fn("BadJob", |_args, _ctx| {
            Err(JobError::new("RuntimeError", "Bad job!"))
        });
        registry.register_fn("PanicJob", |_args, _ctx| panic!("exploded"));
        registry
    }

    fn job(class: &str) -> Job {
        Job::new("jobs", Payload::new(class, vec![json!(1)]))
    }

    #[test]
    fn test_launch_success() {
        let outcome = Launch::new(&registry(), &job("GoodJob"), "host:1:jobs").run(CancelFlag::new());
        assert!(outcome.is_success());
    }

    #[test]
    fn test_launch_failure_carries_job_error() {
        let outcome = Launch::new(&registry(), &job("BadJob"), "host:1:jobs").run(CancelFlag::new());
        assert_eq!(
            outcome,
            ExecutionOutcome::Failure(JobError::new("RuntimeError", "Bad job!"))
        );
    }

    #[test]
    fn test_launch_contains_panics() {
        let outcome = Launch::new(&registry(), &job("PanicJob"), "host:1:jobs").run(CancelFlag::new());
        match outcome {
            ExecutionOutcome::Failure(error) => {
                assert_eq!(error.kind, PANIC);
                assert_eq!(error.message, "exploded");
            }
            ExecutionOutcome::Success => panic!("panicking job reported success"),
        }
    }

    #[test]
    fn test_unknown_class_is_missing_capability() {
        let outcome = Launch::new(&registry(), &job("Nope"), "host:1:jobs").run(CancelFlag::new());
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failure(ref error) if error.kind == MISSING_CAPABILITY
        ));
    }

    #[test]
    fn test_inline_job_reports_once() {
        let launch = Launch::new(&registry(), &job("GoodJob"), "host:1:jobs");
        let mut inline = spawn_isolated(IsolationMode::Inline, launch).unwrap();
        assert_eq!(inline.poll_exit().unwrap(), Some(ExecutionOutcome::Success));
        assert_eq!(inline.poll_exit().unwrap(), None);
    }
}
