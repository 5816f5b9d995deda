//! Job class capabilities and the class registry
//!
//! A job class is looked up by the `class` string of a payload. It may
//! expose a perform capability ([`Executable`]) and any number of named
//! failure hooks ([`FailureObserver`]). Capabilities are resolved once at
//! dispatch; a class that is unknown or cannot perform is reported as a
//! `MissingCapabilityFailure`.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::JobError;
use crate::job::{Job, JobContext};

/// Perform capability of a job class
///
/// Runs synchronously inside the isolated execution context. In fork mode
/// that is a child process without an async runtime, so implementations
/// must not rely on the parent's tokio runtime.
pub trait Executable: Send + Sync {
    fn perform(&self, args: &[Value], ctx: &JobContext) -> Result<(), JobError>;
}

impl<F> Executable for F
where
    F: Fn(&[Value], &JobContext) -> Result<(), JobError> + Send + Sync,
{
    fn perform(&self, args: &[Value], ctx: &JobContext) -> Result<(), JobError> {
        self(args, ctx)
    }
}

/// Failure hook of a job class, invoked in the worker after a failure
pub trait FailureObserver: Send + Sync {
    fn on_failure(&self, error: &JobError, args: &[Value]) -> Result<(), JobError>;
}

impl<F> FailureObserver for F
where
    F: Fn(&JobError, &[Value]) -> Result<(), JobError> + Send + Sync,
{
    fn on_failure(&self, error: &JobError, args: &[Value]) -> Result<(), JobError> {
        self(error, args)
    }
}

/// Process-wide fork hook receiving the job about to run
pub type JobHook = Arc<dyn Fn(&Job) + Send + Sync>;

/// A named job class and its capabilities
#[derive(Clone)]
pub struct JobClass {
    name: String,
    executable: Option<Arc<dyn Executable>>,
    failure_hooks: BTreeMap<String, Arc<dyn FailureObserver>>,
}

impl JobClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executable: None,
            failure_hooks: BTreeMap::new(),
        }
    }

    pub fn with_executable(mut self, executable: impl Executable + 'static) -> Self {
        self.executable = Some(Arc::new(executable));
        self
    }

    /// Register a failure hook under `name`. Registering one hook object
    /// under several names still invokes it once per failure.
    pub fn with_failure_hook(
        mut self,
        name: impl Into<String>,
        hook: Arc<dyn FailureObserver>,
    ) -> Self {
        self.failure_hooks.insert(name.into(), hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executable(&self) -> Option<Arc<dyn Executable>> {
        self.executable.clone()
    }

    pub fn failure_hook_names(&self) -> Vec<String> {
        self.failure_hooks.keys().cloned().collect()
    }

    /// Distinct failure hooks in name order.
    pub fn failure_observers(&self) -> Vec<Arc<dyn FailureObserver>> {
        let mut seen: Vec<*const ()> = Vec::new();
        let mut observers = Vec::new();
        for hook in self.failure_hooks.values() {
            let ptr = Arc::as_ptr(hook) as *const ();
            if !seen.contains(&ptr) {
                seen.push(ptr);
                observers.push(Arc::clone(hook));
            }
        }
        observers
    }
}

impl fmt::Debug for JobClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobClass")
            .field("name", &self.name)
            .field("executable", &self.executable.is_some())
            .field("failure_hooks", &self.failure_hook_names())
            .finish()
    }
}

/// Registry of job classes by name
#[derive(Default)]
pub struct JobRegistry {
    classes: RwLock<HashMap<String, Arc<JobClass>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, class: JobClass) {
        let name = class.name().to_string();
        tracing::debug!(class = %name, "Registered job class");
        self.classes.write().insert(name, Arc::new(class));
    }

    /// Register a class whose only capability is the given perform function.
    pub fn register_fn<F>(&self, name: impl Into<String>, perform: F)
    where
        F: Fn(&[Value], &JobContext) -> Result<(), JobError> + Send + Sync + 'static,
    {
        self.register(JobClass::new(name).with_executable(perform));
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobClass>> {
        self.classes.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve the perform capability for `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Executable>, JobError> {
        let class = self
            .get(name)
            .ok_or_else(|| JobError::missing_capability(format!("Unknown job class: {}", name)))?;
        class.executable().ok_or_else(|| {
            JobError::missing_capability(format!("Job class {} does not define perform", name))
        })
    }

    /// Distinct failure hooks of `name`, empty for unknown classes.
    pub fn failure_observers(&self, name: &str) -> Vec<Arc<dyn FailureObserver>> {
        self.get(name)
            .map(|class| class.failure_observers())
            .unwrap_or_default()
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("classes", &self.class_names())
            .finish()
    }
}
