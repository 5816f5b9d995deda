//! Jobs, payloads and the context handed to job logic

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Queued unit of work: the class to run and its positional arguments
///
/// Only `class` and `args` are consumed by the engine; any other fields a
/// producer writes are carried along in `extra` so requeueing preserves them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub class: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Payload {
    pub fn new(class: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            class: class.into(),
            args,
            extra: Map::new(),
        }
    }

    /// Stand-in for a queued item that could not be decoded, keeping its
    /// text under `raw`.
    pub fn malformed(raw: impl Into<String>) -> Self {
        let mut extra = Map::new();
        extra.insert("raw".to_string(), Value::String(raw.into()));
        Self {
            class: String::new(),
            args: Vec::new(),
            extra,
        }
    }
}

/// A payload reserved from a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub queue: String,
    pub payload: Payload,
    pub run_at: DateTime<Utc>,
}

impl Job {
    pub fn new(queue: impl Into<String>, payload: Payload) -> Self {
        Self {
            queue: queue.into(),
            payload,
            run_at: Utc::now(),
        }
    }

    pub fn class(&self) -> &str {
        &self.payload.class
    }

    pub fn args(&self) -> &[Value] {
        &self.payload.args
    }

    /// The registry projection of this job while it runs.
    pub fn working_on(&self) -> WorkingOnRecord {
        WorkingOnRecord {
            queue: self.queue.clone(),
            payload: self.payload.clone(),
            run_at: self.run_at,
        }
    }
}

/// What a worker is currently executing, keyed by worker id in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingOnRecord {
    pub queue: String,
    pub payload: Payload,
    pub run_at: DateTime<Utc>,
}

impl From<WorkingOnRecord> for Job {
    fn from(record: WorkingOnRecord) -> Self {
        Job {
            queue: record.queue,
            payload: record.payload,
            run_at: record.run_at,
        }
    }
}

/// Cancellation flag observed by job logic
///
/// Thread isolation shares a flag with its supervisor; a forked child
/// points at a process-global flag set from its SIGTERM handler.
#[derive(Debug, Clone)]
pub enum CancelFlag {
    Shared(Arc<AtomicBool>),
    Static(&'static AtomicBool),
}

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::Shared(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        match self {
            CancelFlag::Shared(flag) => flag.load(Ordering::SeqCst),
            CancelFlag::Static(flag) => flag.load(Ordering::SeqCst),
        }
    }

    pub fn cancel(&self) {
        match self {
            CancelFlag::Shared(flag) => flag.store(true, Ordering::SeqCst),
            CancelFlag::Static(flag) => flag.store(true, Ordering::SeqCst),
        }
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution context passed to [`crate::Executable::perform`]
#[derive(Debug, Clone)]
pub struct JobContext {
    pub queue: String,
    pub class: String,
    pub worker: String,
    cancel: CancelFlag,
}

impl JobContext {
    pub fn new(job: &Job, worker: impl Into<String>, cancel: CancelFlag) -> Self {
        Self {
            queue: job.queue.clone(),
            class: job.payload.class.clone(),
            worker: worker.into(),
            cancel,
        }
    }

    /// True once the worker asked the job to stop (TERM with `term_child`).
    /// Long-running jobs should check this and return early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_set()
    }
}
