//! Worker error types

use quarry_config::ConfigError;
use quarry_core::ErrorKind;
use quarry_execution::ExecutionError;
use quarry_resilience::ShutdownError;
use quarry_store::StoreError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that stop a worker or reject an administrative call.
///
/// Job-level failures never surface here; they become failure records.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Shutdown error: {0}")]
    Shutdown(#[from] ShutdownError),
}

impl WorkerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        WorkerError::Configuration(message.into())
    }

    /// Taxonomy entry for errors that have one
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            WorkerError::Configuration(_) => Some(ErrorKind::ConfigurationError),
            _ => None,
        }
    }
}

impl From<ConfigError> for WorkerError {
    fn from(error: ConfigError) -> Self {
        WorkerError::Configuration(error.to_string())
    }
}
