//! Inter-process communication for Quarry
//!
//! This crate provides the protocol an isolated job uses to report its
//! outcome to the worker that spawned it, and the pipe transport carrying it.

pub mod error;
pub mod protocol;
#[cfg(unix)]
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{
    decode_line, encode_line, ChildMessage, MessageEnvelope, IPC_PROTOCOL_VERSION,
    MAX_MESSAGE_BYTES,
};
#[cfg(unix)]
pub use transport::{result_pipe, PipeReader, PipeWriter};
