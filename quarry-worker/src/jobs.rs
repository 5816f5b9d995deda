//! Enqueueing and removing jobs

use quarry_core::Payload;
use quarry_store::Store;
use serde_json::Value;
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Push a job onto `queue`. Queue and class names must be non-blank.
pub async fn create(
    store: &dyn Store,
    queue: &str,
    class: &str,
    args: Vec<Value>,
) -> WorkerResult<Payload> {
    let queue = queue.trim();
    let class = class.trim();
    if queue.is_empty() {
        return Err(WorkerError::configuration("Jobs must be placed onto a queue"));
    }
    if class.is_empty() {
        return Err(WorkerError::configuration("Jobs must be given a class"));
    }

    let payload = Payload::new(class, args);
    store.push(queue, &payload).await?;
    debug!(queue, class, "Enqueued job");
    Ok(payload)
}

/// Remove queued jobs of `class`, optionally only those with exactly `args`.
/// Returns the number of jobs removed.
pub async fn destroy(
    store: &dyn Store,
    queue: &str,
    class: &str,
    args: Option<&[Value]>,
) -> WorkerResult<usize> {
    let mut matching: Vec<Payload> = Vec::new();
    for payload in store.queue_payloads(queue).await? {
        let wanted = payload.class == class && args.is_none_or(|args| payload.args == args);
        if wanted && !matching.contains(&payload) {
            matching.push(payload);
        }
    }

    let mut removed = 0;
    for payload in &matching {
        removed += store.remove_payload(queue, payload).await?;
    }
    debug!(queue, class, removed, "Destroyed queued jobs");
    Ok(removed)
}
