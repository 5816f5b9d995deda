//! Core error types for Quarry

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Exception kind recorded when a worker or its isolated job vanished
/// without reporting an outcome.
pub const DIRTY_EXIT: &str = "DirtyExit";

/// Exception kind recorded when a job class is unknown or cannot perform.
pub const MISSING_CAPABILITY: &str = "MissingCapabilityFailure";

/// Exception kind recorded when job logic panicked.
pub const PANIC: &str = "Panic";

/// Exception kind used by jobs that stopped after observing cancellation.
pub const CANCELLED: &str = "Cancelled";

/// Exception kind recorded when a queued item could not be decoded.
pub const MALFORMED_PAYLOAD: &str = "MalformedPayload";

/// Exception kind used when a job error is built from a plain error value.
pub const JOB_EXECUTION_FAILURE: &str = "JobExecutionFailure";

/// Error taxonomy of the worker engine
///
/// Only [`ErrorKind::ConfigurationError`] is fatal to worker startup; every
/// other kind is recovered locally and surfaces as a failure record,
/// counters, or a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Job logic returned an error or panicked
    JobExecutionFailure,
    /// Worker or isolated job disappeared while holding work
    DirtyExit,
    /// Worker constructed with an unusable configuration
    ConfigurationError,
    /// Job class is unknown or lacks a perform capability
    MissingCapabilityFailure,
    /// Failure hook or failure tracker write path raised
    HookFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::JobExecutionFailure => JOB_EXECUTION_FAILURE,
            ErrorKind::DirtyExit => DIRTY_EXIT,
            ErrorKind::ConfigurationError => "ConfigurationError",
            ErrorKind::MissingCapabilityFailure => MISSING_CAPABILITY,
            ErrorKind::HookFailure => "HookFailure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by job logic, or synthesized by the engine on the job's behalf
///
/// `kind` plays the role of an exception class name and is stored verbatim
/// in the failure record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub backtrace: Vec<String>,
}

impl JobError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            backtrace: Vec::new(),
        }
    }

    pub fn with_backtrace(mut self, backtrace: Vec<String>) -> Self {
        self.backtrace = backtrace;
        self
    }

    /// Build a job error from any error value, recording its source chain
    /// as the backtrace.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut backtrace = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            backtrace.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        Self::new(JOB_EXECUTION_FAILURE, error.to_string()).with_backtrace(backtrace)
    }

    pub fn dirty_exit(message: impl Into<String>) -> Self {
        Self::new(DIRTY_EXIT, message)
    }

    pub fn missing_capability(message: impl Into<String>) -> Self {
        Self::new(MISSING_CAPABILITY, message)
    }

    pub fn malformed_payload(message: impl Into<String>) -> Self {
        Self::new(MALFORMED_PAYLOAD, message)
    }

    pub fn cancelled() -> Self {
        Self::new(CANCELLED, "job cancelled by worker shutdown")
    }

    /// Convert a caught panic payload into a job error.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "job panicked with a non-string payload".to_string()
        };
        Self::new(PANIC, message)
    }

    /// Where this error sits in the engine's error taxonomy.
    pub fn error_kind(&self) -> ErrorKind {
        match self.kind.as_str() {
            DIRTY_EXIT => ErrorKind::DirtyExit,
            MISSING_CAPABILITY => ErrorKind::MissingCapabilityFailure,
            _ => ErrorKind::JobExecutionFailure,
        }
    }

    /// Shrink kind, message and backtrace so the error fits in `max_bytes`
    /// once serialized as JSON. The innermost backtrace frames are kept.
    pub fn truncated(&self, max_bytes: usize) -> Self {
        let mut error = self.clone();
        truncate_escaped(&mut error.kind, KIND_LIMIT.min(max_bytes / 4));
        truncate_escaped(&mut error.message, max_bytes / 2);

        let mut used = FIELD_OVERHEAD + escaped_len(&error.kind) + escaped_len(&error.message);
        let mut kept = Vec::new();
        for line in error.backtrace.iter().rev() {
            // quotes and separator
            let cost = escaped_len(line) + 3;
            if used + cost > max_bytes {
                break;
            }
            used += cost;
            kept.push(line.clone());
        }
        kept.reverse();
        error.backtrace = kept;

        while serialized_len(&error) > max_bytes {
            if !error.backtrace.is_empty() {
                error.backtrace.remove(0);
            } else if !error.message.is_empty() {
                let half = escaped_len(&error.message) / 2;
                truncate_escaped(&mut error.message, half);
            } else if !error.kind.is_empty() {
                let half = escaped_len(&error.kind) / 2;
                truncate_escaped(&mut error.kind, half);
            } else {
                break;
            }
        }
        error
    }

    /// Same kind, with the message replaced by a fixed marker. Used when
    /// even the truncated error cannot be reported.
    pub fn too_large(&self) -> Self {
        let mut kind = self.kind.clone();
        truncate_escaped(&mut kind, KIND_LIMIT);
        Self::new(kind, MESSAGE_TOO_LARGE)
    }
}

/// Message recorded in place of a failure that could not be reported whole.
pub const MESSAGE_TOO_LARGE: &str = "<message too large>";

/// Largest escaped length kept for an error kind.
const KIND_LIMIT: usize = 512;

/// `{"kind":"","message":"","backtrace":[]}`
const FIELD_OVERHEAD: usize = 40;

fn serialized_len(error: &JobError) -> usize {
    serde_json::to_vec(error).map(|bytes| bytes.len()).unwrap_or(usize::MAX)
}

/// Bytes `c` occupies inside a JSON string literal.
fn escaped_char_len(c: char) -> usize {
    match c {
        '"' | '\\' | '\n' | '\r' | '\t' | '\u{8}' | '\u{c}' => 2,
        c if (c as u32) < 0x20 => 6,
        c => c.len_utf8(),
    }
}

fn escaped_len(text: &str) -> usize {
    text.chars().map(escaped_char_len).sum()
}

/// Cut `text` at a char boundary so its escaped form is at most `budget` bytes.
fn truncate_escaped(text: &mut String, budget: usize) {
    let mut used = 0;
    let mut cut = text.len();
    for (index, c) in text.char_indices() {
        used += escaped_char_len(c);
        if used > budget {
            cut = index;
            break;
        }
    }
    text.truncate(cut);
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for JobError {}

/// Errors parsing identifiers and enumerations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid worker id: {0}")]
    InvalidWorkerId(String),

    #[error("Invalid isolation mode: {0}")]
    InvalidIsolationMode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer failure")]
    struct Outer {
        #[source]
        inner: Inner,
    }

    #[derive(Debug, Error)]
    #[error("inner failure")]
    struct Inner;

    #[test]
    fn test_from_error_records_source_chain() {
        let error = JobError::from_error(&Outer { inner: Inner });
        assert_eq!(error.kind, JOB_EXECUTION_FAILURE);
        assert_eq!(error.message, "outer failure");
        assert_eq!(error.backtrace, vec!["caused by: inner failure".to_string()]);
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(JobError::dirty_exit("gone").error_kind(), ErrorKind::DirtyExit);
        assert_eq!(
            JobError::missing_capability("Nope").error_kind(),
            ErrorKind::MissingCapabilityFailure
        );
        assert_eq!(
            JobError::new("RuntimeError", "boom").error_kind(),
            ErrorKind::JobExecutionFailure
        );
    }

    #[test]
    fn test_error_kind_names_match_recorded_kinds() {
        assert_eq!(ErrorKind::DirtyExit.as_str(), DIRTY_EXIT);
        assert_eq!(ErrorKind::MissingCapabilityFailure.as_str(), MISSING_CAPABILITY);
        assert_eq!(ErrorKind::JobExecutionFailure.to_string(), JOB_EXECUTION_FAILURE);
        assert_eq!(
            serde_json::to_string(&ErrorKind::DirtyExit).unwrap(),
            format!("\"{}\"", DIRTY_EXIT)
        );
    }

    #[test]
    fn test_from_panic_payloads() {
        let static_str: Box<dyn std::any::Any + Send> = Box::new("static panic");
        assert_eq!(JobError::from_panic(static_str.as_ref()).message, "static panic");

        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned panic"));
        assert_eq!(JobError::from_panic(owned.as_ref()).message, "owned panic");

        let other: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(JobError::from_panic(other.as_ref()).kind, PANIC);
    }

    #[test]
    fn test_truncated_keeps_innermost_frames() {
        let frames: Vec<String> = (0..1000).map(|i| format!("frame {:04}", i)).collect();
        let error = JobError::new("RuntimeError", "x".repeat(10_000)).with_backtrace(frames);

        let small = error.truncated(4096);
        assert!(small.message.len() <= 2048);
        assert!(serde_json::to_string(&small).unwrap().len() < 4096 + 1024);
        assert_eq!(small.backtrace.last().map(String::as_str), Some("frame 0999"));
    }

    #[test]
    fn test_truncated_accounts_for_json_escaping() {
        let error = JobError::new("RuntimeError", "\u{1}".repeat(40_000));
        let small = error.truncated(8192);

        assert!(serde_json::to_vec(&small).unwrap().len() <= 8192);
        assert_eq!(small.kind, "RuntimeError");
        assert!(!small.message.is_empty());
        assert!(small.message.chars().all(|c| c == '\u{1}'));
    }

    #[test]
    fn test_truncated_shortens_oversized_kind() {
        let error = JobError::new("K".repeat(70_000), "boom");
        let small = error.truncated(8192);

        assert!(serde_json::to_vec(&small).unwrap().len() <= 8192);
        assert!(small.kind.starts_with('K'));
        assert!(small.kind.len() <= KIND_LIMIT);
        assert_eq!(small.message, "boom");
    }

    #[test]
    fn test_too_large_keeps_kind_only() {
        let error = JobError::new("RuntimeError", "x".repeat(100))
            .with_backtrace(vec!["frame".to_string()]);
        let marker = error.too_large();

        assert_eq!(marker.kind, "RuntimeError");
        assert_eq!(marker.message, MESSAGE_TOO_LARGE);
        assert!(marker.backtrace.is_empty());
    }
}
