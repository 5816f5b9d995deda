//! Resilience patterns for Quarry
//!
//! This crate provides shutdown coordination for workers, the operating
//! system signal listener feeding it, and process liveness probing used by
//! crash recovery and child supervision.

pub mod process;
pub mod shutdown;
pub mod signals;

// Re-export commonly used types
pub use process::{pid_alive, ProcessProbe, SystemProbe};
#[cfg(unix)]
pub use process::signal_process;
pub use shutdown::{ShutdownCoordinator, ShutdownError, ShutdownHandle, ShutdownSignal};
pub use signals::listen;
