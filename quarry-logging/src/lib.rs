//! Logging initialisation for Quarry
//!
//! Workers log through `tracing` macros with structured fields (`worker`,
//! `queue`, `class`, `pid`). This crate installs the global subscriber from
//! the logging domain of the configuration.

pub mod init;

pub use init::{filter_directive, init_logging_from_config, init_simple_tracing, init_worker_logging};
