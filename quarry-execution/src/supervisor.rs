//! Waiting on an isolated job while staying responsive to shutdown events

use quarry_resilience::{ShutdownCoordinator, ShutdownSignal};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::ExecutionError;
use crate::executor::{ExecutionOutcome, IsolatedJob};
use crate::state::{ExecutionState, StateTracker};

/// How an immediate shutdown treats the running job
#[derive(Debug, Clone)]
pub struct TermPolicy {
    /// Forward SIGTERM to the job instead of leaving it running
    pub term_child: bool,
    /// Grace period between the forwarded SIGTERM and SIGKILL
    pub term_timeout: Duration,
    /// How often the job's exit status is polled
    pub poll_interval: Duration,
}

impl Default for TermPolicy {
    fn default() -> Self {
        Self {
            term_child: false,
            term_timeout: Duration::from_secs(4),
            poll_interval: Duration::from_millis(25),
        }
    }
}

/// How supervision of one job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Supervision {
    /// The isolated context exited and reported this outcome
    Finished(ExecutionOutcome),
    /// Immediate shutdown without `term_child`; the job was left running
    Abandoned,
}

/// Wait for `job` to exit, reacting to lifecycle events.
///
/// - `Immediate` with `term_child` sends SIGTERM, then SIGKILL once
///   `term_timeout` has elapsed.
/// - `Immediate` without `term_child` stops supervising and returns
///   [`Supervision::Abandoned`].
/// - `KillChild` kills the job right away.
/// - `Graceful`, `Pause` and `Resume` let the job finish.
pub async fn supervise(
    job: &mut dyn IsolatedJob,
    events: &mut broadcast::Receiver<ShutdownSignal>,
    coordinator: &ShutdownCoordinator,
    policy: &TermPolicy,
    state: &StateTracker,
) -> Result<Supervision, ExecutionError> {
    let pid = job.pid();
    let mut kill_deadline: Option<Instant> = None;
    let mut terminating = false;
    let mut events_open = true;

    state.set(ExecutionState::Running);

    // An immediate shutdown may have arrived while the job was being dispatched.
    if coordinator.is_immediate() {
        match begin_termination(job, policy, state)? {
            Some(deadline) => {
                terminating = true;
                kill_deadline = Some(deadline);
            }
            None => return Ok(Supervision::Abandoned),
        }
    }

    loop {
        if let Some(outcome) = job.poll_exit()? {
            return Ok(Supervision::Finished(outcome));
        }

        if let Some(deadline) = kill_deadline {
            if Instant::now() >= deadline {
                warn!(pid, timeout = ?policy.term_timeout, "Job ignored SIGTERM, killing it");
                job.kill()?;
                state.set(ExecutionState::Killed);
                kill_deadline = None;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(policy.poll_interval) => {}
            event = events.recv(), if events_open => {
                let signal = match event {
                    Ok(signal) => Some(signal),
                    Err(RecvError::Lagged(_)) => {
                        coordinator.is_immediate().then_some(ShutdownSignal::Immediate)
                    }
                    Err(RecvError::Closed) => {
                        events_open = false;
                        None
                    }
                };

                match signal {
                    Some(ShutdownSignal::Immediate) if !terminating => {
                        match begin_termination(job, policy, state)? {
                            Some(deadline) => {
                                terminating = true;
                                kill_deadline = Some(deadline);
                            }
                            None => return Ok(Supervision::Abandoned),
                        }
                    }
                    Some(ShutdownSignal::KillChild) => {
                        info!(pid, "Killing job on request");
                        job.kill()?;
                        state.set(ExecutionState::Killed);
                        kill_deadline = None;
                    }
                    Some(ShutdownSignal::Graceful) => {
                        info!(pid, "Graceful shutdown requested, waiting for job to finish");
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Start terminating the job. `None` means the job is left unsupervised.
fn begin_termination(
    job: &mut dyn IsolatedJob,
    policy: &TermPolicy,
    state: &StateTracker,
) -> Result<Option<Instant>, ExecutionError> {
    let pid = job.pid();
    if !policy.term_child {
        warn!(
            pid,
            "Immediate shutdown without term_child; job may continue unsupervised"
        );
        return Ok(None);
    }

    info!(pid, timeout = ?policy.term_timeout, "Sending SIGTERM to job");
    job.terminate()?;
    state.set(ExecutionState::Terminating);
    Ok(Some(Instant::now() + policy.term_timeout))
}
