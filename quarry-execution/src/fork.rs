//! Fork isolation
//!
//! The child never touches the parent's async runtime, store or locks: it
//! resets the worker's signal dispositions, runs the already-resolved job,
//! writes one result message to a pipe and leaves through `_exit`.
//!
//! The worker forks from a multi-threaded runtime, so only the forking
//! thread exists in the child and any lock another thread held stays locked.
//! The child path therefore does not log; job logic that logs or allocates
//! under contention in the child does so at its own risk.

use nix::errno::Errno;
use nix::sys::signal::{self, pthread_sigmask, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use quarry_core::{CancelFlag, JobError};
use quarry_ipc::{result_pipe, ChildMessage, IpcError, MessageEnvelope, PipeReader, PipeWriter};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::executor::{ExecutionOutcome, IsolatedJob, Launch};

/// Set in a forked child once it receives SIGTERM.
static CHILD_TERM_REQUESTED: AtomicBool = AtomicBool::new(false);

const CHILD_SUCCESS: i32 = 0;
const CHILD_JOB_FAILED: i32 = 1;
const CHILD_REPORT_FAILED: i32 = 2;

/// Signals the worker listens for; the child must not inherit its handlers.
const WORKER_SIGNALS: [Signal; 6] = [
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
    Signal::SIGCONT,
];

extern "C" fn on_child_term(_: nix::libc::c_int) {
    CHILD_TERM_REQUESTED.store(true, Ordering::SeqCst);
}

/// A job running in a forked child process
#[derive(Debug)]
pub struct ForkedJob {
    pid: Pid,
    reader: PipeReader,
    reaped: bool,
}

impl ForkedJob {
    /// Fork a child running `launch`.
    pub fn spawn(launch: Launch) -> Result<Self, ExecutionError> {
        let (reader, writer) = result_pipe()?;

        // Keep signals pending across fork so the child cannot run the
        // parent's handlers before it has reset them.
        let mut previous = SigSet::empty();
        pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::all()), Some(&mut previous))?;

        // SAFETY: the child only resets signal dispositions, runs the job
        // closure and writes to a pipe before calling `_exit`; it never
        // returns into the parent's runtime.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                drop(reader);
                run_child(launch, writer, &previous)
            }
            Ok(ForkResult::Parent { child }) => {
                pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&previous), None)?;
                drop(writer);
                reader.set_nonblocking()?;
                debug!(pid = child.as_raw(), "Forked job process");
                Ok(Self {
                    pid: child,
                    reader,
                    reaped: false,
                })
            }
            Err(e) => {
                let _ = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&previous), None);
                Err(ExecutionError::ForkFailed(e.to_string()))
            }
        }
    }

    fn reported_outcome(&mut self, status: &str) -> ExecutionOutcome {
        match self.reader.try_receive::<ChildMessage>() {
            Ok(Some(envelope)) => match envelope.message {
                ChildMessage::Completed { .. } => ExecutionOutcome::Success,
                ChildMessage::Failed { error, .. } => ExecutionOutcome::Failure(error),
            },
            Ok(None) => ExecutionOutcome::Failure(JobError::dirty_exit(format!(
                "Child process {} without reporting a result",
                status
            ))),
            Err(e) => {
                warn!(pid = self.pid.as_raw(), error = %e, "Unreadable result from job process");
                ExecutionOutcome::Failure(JobError::dirty_exit(format!(
                    "Child process {} with an unreadable result: {}",
                    status, e
                )))
            }
        }
    }

    fn send(&self, signal: Signal) -> Result<(), ExecutionError> {
        if self.reaped {
            return Ok(());
        }
        match signal::kill(self.pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(ExecutionError::SignalError(format!(
                "failed to send {} to {}: {}",
                signal, self.pid, e
            ))),
        }
    }
}

impl IsolatedJob for ForkedJob {
    fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    fn poll_exit(&mut self) -> Result<Option<ExecutionOutcome>, ExecutionError> {
        if self.reaped {
            return Ok(None);
        }
        if let Err(e) = self.reader.drain() {
            debug!(pid = self.pid.as_raw(), error = %e, "Failed to drain result pipe");
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                self.reaped = true;
                Ok(Some(self.reported_outcome(&format!("exited with status {}", code))))
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                self.reaped = true;
                Ok(Some(ExecutionOutcome::Failure(JobError::dirty_exit(format!(
                    "Child process received unhandled signal {}",
                    signal
                )))))
            }
            Ok(_) | Err(Errno::EINTR) => Ok(None),
            Err(e) => Err(ExecutionError::WaitFailed(e.to_string())),
        }
    }

    fn terminate(&mut self) -> Result<(), ExecutionError> {
        self.send(Signal::SIGTERM)
    }

    fn kill(&mut self) -> Result<(), ExecutionError> {
        self.send(Signal::SIGKILL)
    }
}

fn run_child(launch: Launch, mut writer: PipeWriter, previous_mask: &SigSet) -> ! {
    for sig in WORKER_SIGNALS {
        // SAFETY: restoring the default disposition installs no handler.
        let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    }
    // SAFETY: the handler only stores to an atomic.
    let _ = unsafe { signal::signal(Signal::SIGTERM, SigHandler::Handler(on_child_term)) };
    let _ = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(previous_mask), None);

    let pid = std::process::id();
    let outcome = launch.run(CancelFlag::Static(&CHILD_TERM_REQUESTED));
    let code = match outcome {
        ExecutionOutcome::Success => report(&mut writer, ChildMessage::Completed { pid }, CHILD_SUCCESS),
        ExecutionOutcome::Failure(error) => {
            match writer.send(&MessageEnvelope::new(ChildMessage::failed(pid, &error))) {
                Ok(()) => CHILD_JOB_FAILED,
                Err(IpcError::MessageTooLarge { .. }) => report(
                    &mut writer,
                    ChildMessage::too_large(pid, &error),
                    CHILD_JOB_FAILED,
                ),
                Err(_) => CHILD_REPORT_FAILED,
            }
        }
    };

    // SAFETY: this is the forked child and the result has been written and
    // flushed; `_exit` skips destructors and atexit handlers inherited from
    // the parent.
    unsafe { nix::libc::_exit(code) }
}

fn report(writer: &mut PipeWriter, message: ChildMessage, code: i32) -> i32 {
    match writer.send(&MessageEnvelope::new(message)) {
        Ok(()) => code,
        Err(_) => CHILD_REPORT_FAILED,
    }
}
