//! Failure records and per-worker counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::job::Payload;

/// A captured job failure
///
/// Stored in an append-only list. `retried_at` is set when the payload is
/// pushed back onto its queue and is never cleared afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub failed_at: DateTime<Utc>,
    pub payload: Payload,
    pub exception: String,
    pub error: String,
    #[serde(default)]
    pub backtrace: Vec<String>,
    pub worker: String,
    pub queue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retried_at: Option<DateTime<Utc>>,
}

impl FailureRecord {
    pub fn new(
        error: &JobError,
        payload: Payload,
        queue: impl Into<String>,
        worker: impl Into<String>,
    ) -> Self {
        Self {
            failed_at: Utc::now(),
            payload,
            exception: error.kind.clone(),
            error: error.message.clone(),
            backtrace: error.backtrace.clone(),
            worker: worker.into(),
            queue: queue.into(),
            retried_at: None,
        }
    }

    pub fn is_retried(&self) -> bool {
        self.retried_at.is_some()
    }

    /// Stamp the record as requeued. A record keeps its first retry time.
    pub fn mark_retried(&mut self) {
        if self.retried_at.is_none() {
            self.retried_at = Some(Utc::now());
        }
    }
}

/// Processed/failed counters kept per worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCounters {
    pub processed: u64,
    pub failed: u64,
}
