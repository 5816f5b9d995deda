//! Core domain models and types for Quarry
//!
//! This crate contains the fundamental types shared by the store, the
//! execution engine and the worker: jobs and their payloads, worker
//! identities, failure records, and the capability traits job classes
//! implement. It has minimal dependencies and defines the domain language
//! of the application.

pub mod error;
pub mod failure;
pub mod job;
pub mod registry;
pub mod types;

// Re-export commonly used types at the crate root
pub use error::{ErrorKind, JobError, ParseError};
pub use failure::{FailureRecord, WorkerCounters};
pub use job::{CancelFlag, Job, JobContext, Payload, WorkingOnRecord};
pub use registry::{Executable, FailureObserver, JobClass, JobHook, JobRegistry};
pub use types::{IsolationMode, WorkerId, WILDCARD_QUEUE};
