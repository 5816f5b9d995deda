//! Execution lifecycle state of a worker

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Where a worker is in its reserve/run/report cycle
///
/// `Idle -> Reserving -> Dispatching -> Running -> Reporting -> Idle`, with
/// `Running -> Terminating -> Killed` when a shutdown or kill request
/// interrupts the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionState {
    #[default]
    Idle,
    Reserving,
    Dispatching,
    Running,
    Reporting,
    Terminating,
    Killed,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Reserving => "reserving",
            ExecutionState::Dispatching => "dispatching",
            ExecutionState::Running => "running",
            ExecutionState::Reporting => "reporting",
            ExecutionState::Terminating => "terminating",
            ExecutionState::Killed => "killed",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared, cloneable view of a worker's current [`ExecutionState`]
#[derive(Debug, Clone, Default)]
pub struct StateTracker {
    inner: Arc<Mutex<ExecutionState>>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ExecutionState {
        *self.inner.lock()
    }

    pub fn set(&self, state: ExecutionState) {
        let mut current = self.inner.lock();
        if *current != state {
            tracing::trace!(from = %*current, to = %state, "Execution state changed");
            *current = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_is_shared_between_clones() {
        let tracker = StateTracker::new();
        let view = tracker.clone();
        assert_eq!(view.get(), ExecutionState::Idle);

        tracker.set(ExecutionState::Running);
        assert_eq!(view.get(), ExecutionState::Running);
        assert_eq!(view.get().to_string(), "running");
    }
}
