//! Error types for job execution

use quarry_ipc::IpcError;
use quarry_resilience::ShutdownError;
use thiserror::Error;

/// Failures of the isolation machinery itself
///
/// Job failures are not errors at this level; they are reported as
/// [`crate::ExecutionOutcome::Failure`].
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Fork failed: {0}")]
    ForkFailed(String),

    #[error("Failed to spawn job thread: {0}")]
    ThreadSpawnFailed(String),

    #[error("Waiting for job process failed: {0}")]
    WaitFailed(String),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("IPC error: {0}")]
    IpcError(String),
}

// Convert from IPC errors
impl From<IpcError> for ExecutionError {
    fn from(err: IpcError) -> Self {
        Self::IpcError(err.to_string())
    }
}

// Convert from signal delivery errors
impl From<ShutdownError> for ExecutionError {
    fn from(err: ShutdownError) -> Self {
        Self::SignalError(err.to_string())
    }
}

#[cfg(unix)]
impl From<nix::Error> for ExecutionError {
    fn from(err: nix::Error) -> Self {
        Self::SignalError(err.to_string())
    }
}
