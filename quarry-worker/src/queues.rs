//! Queue resolution
//!
//! Turns the configured queue spec into the ordered list polled on each
//! reservation pass. The wildcard is expanded against the store every time.

use quarry_core::WILDCARD_QUEUE;
use quarry_store::{Store, StoreResult};

use crate::error::{WorkerError, WorkerResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueResolver {
    entries: Vec<String>,
}

impl QueueResolver {
    /// Trim the configured names and drop blanks. An empty result is a
    /// configuration error.
    pub fn new<I, S>(queues: I) -> WorkerResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries: Vec<String> = queues
            .into_iter()
            .map(|queue| queue.as_ref().trim().to_string())
            .filter(|queue| !queue.is_empty())
            .collect();

        if entries.is_empty() {
            return Err(WorkerError::configuration(
                "Please give each worker at least one queue",
            ));
        }
        Ok(Self { entries })
    }

    /// The trimmed configured spec, wildcard included
    pub fn configured(&self) -> &[String] {
        &self.entries
    }

    pub fn has_wildcard(&self) -> bool {
        self.entries.iter().any(|queue| queue == WILDCARD_QUEUE)
    }

    /// Polling order for the current pass
    pub async fn resolve(&self, store: &dyn Store) -> StoreResult<Vec<String>> {
        if !self.has_wildcard() {
            return Ok(self.entries.clone());
        }
        let mut live = store.queues().await?;
        live.sort();
        Ok(self.expand(&live))
    }

    /// Replace the wildcard with `live` (already sorted) in place, keeping the
    /// first occurrence of every name.
    pub fn expand(&self, live: &[String]) -> Vec<String> {
        let mut resolved: Vec<String> = Vec::with_capacity(self.entries.len() + live.len());
        for entry in &self.entries {
            if entry == WILDCARD_QUEUE {
                for queue in live {
                    if !resolved.contains(queue) {
                        resolved.push(queue.clone());
                    }
                }
            } else if !resolved.contains(entry) {
                resolved.push(entry.clone());
            }
        }
        resolved
    }
}
