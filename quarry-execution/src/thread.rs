//! Thread isolation
//!
//! Panics are contained and the job observes cancellation through its
//! context, but memory is shared with the worker and a killed job cannot be
//! stopped: it is abandoned and reported as a dirty exit while its thread
//! runs to completion in the background.

use quarry_core::{CancelFlag, JobError};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::JoinHandle;
use tracing::warn;

use crate::error::ExecutionError;
use crate::executor::{ExecutionOutcome, IsolatedJob, Launch};

/// A job running on a dedicated OS thread
#[derive(Debug)]
pub struct ThreadJob {
    receiver: Receiver<ExecutionOutcome>,
    handle: Option<JoinHandle<()>>,
    cancel: CancelFlag,
    abandoned: bool,
    finished: bool,
}

impl ThreadJob {
    pub fn spawn(launch: Launch) -> Result<Self, ExecutionError> {
        let (sender, receiver) = mpsc::channel();
        let cancel = CancelFlag::new();
        let job_cancel = cancel.clone();
        let name = format!("quarry-job-{}", launch.job.class());

        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let outcome = launch.run(job_cancel);
                // The supervisor may have abandoned us already.
                let _ = sender.send(outcome);
            })
            .map_err(|e| ExecutionError::ThreadSpawnFailed(e.to_string()))?;

        Ok(Self {
            receiver,
            handle: Some(handle),
            cancel,
            abandoned: false,
            finished: false,
        })
    }
}

impl IsolatedJob for ThreadJob {
    fn pid(&self) -> u32 {
        std::process::id()
    }

    fn poll_exit(&mut self) -> Result<Option<ExecutionOutcome>, ExecutionError> {
        if self.finished {
            return Ok(None);
        }
        if self.abandoned {
            self.finished = true;
            return Ok(Some(ExecutionOutcome::Failure(JobError::dirty_exit(
                "Job thread was killed and abandoned while running",
            ))));
        }

        match self.receiver.try_recv() {
            Ok(outcome) => {
                self.finished = true;
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        warn!("Job thread panicked after reporting its outcome");
                    }
                }
                Ok(Some(outcome))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                self.finished = true;
                Ok(Some(ExecutionOutcome::Failure(JobError::dirty_exit(
                    "Job thread exited without reporting a result",
                ))))
            }
        }
    }

    fn terminate(&mut self) -> Result<(), ExecutionError> {
        self.cancel.cancel();
        Ok(())
    }

    fn kill(&mut self) -> Result<(), ExecutionError> {
        if !self.finished {
            warn!("Abandoning job thread; it keeps running until its logic returns");
            self.cancel.cancel();
            self.abandoned = true;
            self.handle = None;
        }
        Ok(())
    }
}
