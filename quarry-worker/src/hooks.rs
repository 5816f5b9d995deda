//! Process-wide fork hooks and per-class failure hook dispatch

use quarry_core::{ErrorKind, FailureObserver, Job, JobError, JobHook};
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Hook run once before the first isolated job of a process
pub type StartupHook = Arc<dyn Fn() + Send + Sync>;

/// Optional callbacks around the isolation boundary.
///
/// Share one `Hooks` between the workers of a process with `Arc`;
/// `before_first_fork` fires at most once per instance.
#[derive(Default)]
pub struct Hooks {
    before_first_fork: Option<StartupHook>,
    before_fork: Option<JobHook>,
    after_fork: Option<JobHook>,
    first_fork_ran: AtomicBool,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_first_fork(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.before_first_fork = Some(Arc::new(hook));
        self
    }

    /// Runs in the worker after reservation, before each isolated job
    pub fn before_fork(mut self, hook: impl Fn(&Job) + Send + Sync + 'static) -> Self {
        self.before_fork = Some(Arc::new(hook));
        self
    }

    /// Runs inside the isolated context before the job logic
    pub fn after_fork(mut self, hook: impl Fn(&Job) + Send + Sync + 'static) -> Self {
        self.after_fork = Some(Arc::new(hook));
        self
    }

    pub fn after_fork_hook(&self) -> Option<JobHook> {
        self.after_fork.clone()
    }

    pub fn first_fork_ran(&self) -> bool {
        self.first_fork_ran.load(Ordering::SeqCst)
    }

    /// Parent-side hooks for one isolated dispatch
    pub fn run_before_fork(&self, job: &Job) {
        if !self.first_fork_ran.swap(true, Ordering::SeqCst) {
            if let Some(hook) = &self.before_first_fork {
                debug!("Running before_first_fork hook");
                guard("before_first_fork", || hook());
            }
        }

        if let Some(hook) = &self.before_fork {
            guard("before_fork", || hook(job));
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_first_fork", &self.before_first_fork.is_some())
            .field("before_fork", &self.before_fork.is_some())
            .field("after_fork", &self.after_fork.is_some())
            .field("first_fork_ran", &self.first_fork_ran())
            .finish()
    }
}

fn guard(name: &str, hook: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(hook)) {
        let error = JobError::from_panic(panic.as_ref());
        warn!(
            hook = name,
            kind = %ErrorKind::HookFailure,
            error = %error,
            "Hook panicked"
        );
    }
}

/// Invoke every distinct failure observer once. Errors and panics are
/// logged and swallowed. Returns the number of observers invoked.
pub fn run_failure_hooks(
    class: &str,
    observers: &[Arc<dyn FailureObserver>],
    error: &JobError,
    args: &[Value],
) -> usize {
    for observer in observers {
        let result = catch_unwind(AssertUnwindSafe(|| observer.on_failure(error, args)));
        let failure = match result {
            Ok(Ok(())) => continue,
            Ok(Err(hook_error)) => hook_error,
            Err(panic) => JobError::from_panic(panic.as_ref()),
        };
        warn!(
            class,
            kind = %ErrorKind::HookFailure,
            error = %failure,
            "Failure hook raised"
        );
    }
    observers.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::Payload;
    use std::sync::atomic::AtomicUsize;

    fn job() -> Job {
        Job::new("jobs", Payload::new("GoodJob", vec![]))
    }

    #[test]
    fn test_before_first_fork_runs_once() {
        let first = Arc::new(AtomicUsize::new(0));
        let each = Arc::new(AtomicUsize::new(0));
        let (f, e) = (Arc::clone(&first), Arc::clone(&each));
        let hooks = Hooks::new()
            .before_first_fork(move || {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .before_fork(move |_job| {
                e.fetch_add(1, Ordering::SeqCst);
            });

        assert!(!hooks.first_fork_ran());
        for _ in 0..3 {
            hooks.run_before_fork(&job());
        }
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(each.load(Ordering::SeqCst), 3);
        assert!(hooks.first_fork_ran());
    }

    #[test]
    fn test_panicking_hook_is_contained() {
        let hooks = Hooks::new().before_fork(|_job| panic!("hook exploded"));
        hooks.run_before_fork(&job());
        assert!(hooks.first_fork_ran());
    }

    #[test]
    fn test_failure_hook_errors_are_swallowed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let failing: Arc<dyn FailureObserver> = Arc::new(
            move |_error: &JobError, _args: &[Value]| -> Result<(), JobError> {
                counted.fetch_add(1, Ordering::SeqCst);
                Err(JobError::new("RuntimeError", "hook failed"))
            },
        );
        let panicking: Arc<dyn FailureObserver> =
            Arc::new(|_error: &JobError, _args: &[Value]| -> Result<(), JobError> {
                panic!("hook panicked")
            });

        let invoked = run_failure_hooks(
            "BadJob",
            &[failing, panicking],
            &JobError::new("RuntimeError", "boom"),
            &[],
        );
        assert_eq!(invoked, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
