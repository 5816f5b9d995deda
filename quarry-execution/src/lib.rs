//! Quarry Execution Engine
//!
//! This crate runs one reserved job at a time in an isolated context and
//! supervises it: fork isolation (a child process per job), thread
//! isolation (panic containment without memory isolation) and inline
//! execution. The supervisor keeps the worker responsive to shutdown and
//! kill requests while the job runs.

pub mod error;
pub mod executor;
#[cfg(unix)]
pub mod fork;
pub mod state;
pub mod supervisor;
pub mod thread;

// Re-export main types
pub use error::ExecutionError;
pub use executor::{spawn_isolated, ExecutionOutcome, InlineJob, IsolatedJob, Launch};
#[cfg(unix)]
pub use fork::ForkedJob;
pub use state::{ExecutionState, StateTracker};
pub use supervisor::{supervise, Supervision, TermPolicy};
pub use thread::ThreadJob;
