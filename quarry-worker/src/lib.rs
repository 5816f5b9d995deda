//! Quarry worker lifecycle engine
//!
//! Claims jobs from named queues, runs each one in an isolated context,
//! records failures and keeps a crash-recoverable registration in the shared
//! store. See [`Worker`] for the main loop.

pub mod backend;
pub mod error;
pub mod failure;
pub mod hooks;
pub mod jobs;
pub mod queues;
pub mod registry;
pub mod stats;
pub mod worker;

pub use backend::store_from_config;
pub use error::{WorkerError, WorkerResult};
pub use failure::FailureTracker;
pub use hooks::{run_failure_hooks, Hooks, StartupHook};
pub use queues::QueueResolver;
pub use registry::{WorkerInfo, WorkerRegistry};
pub use stats::Info;
pub use worker::{Worker, WorkerOptions};

// Types needed to drive a worker without depending on the lower crates
pub use quarry_core::{
    FailureObserver, IsolationMode, Job, JobClass, JobContext, JobError, JobRegistry, Payload,
    WorkerId,
};
pub use quarry_execution::ExecutionState;
pub use quarry_resilience::{ProcessProbe, ShutdownHandle, ShutdownSignal, SystemProbe};
pub use quarry_store::{MemoryStore, Store};
