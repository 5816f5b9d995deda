//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use quarry_core::JobError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::IpcError;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Upper bound for one encoded message. Kept below the usual pipe buffer so
/// a child never blocks on write while its parent waits for it to exit.
pub const MAX_MESSAGE_BYTES: usize = 60 * 1024;

/// Messages sent from an isolated job back to its worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildMessage {
    /// Job logic returned successfully
    Completed { pid: u32 },

    /// Job logic failed, panicked, or could not be resolved
    Failed { pid: u32, error: JobError },
}

impl ChildMessage {
    /// Failure message whose encoding fits in [`MAX_MESSAGE_BYTES`].
    pub fn failed(pid: u32, error: &JobError) -> Self {
        ChildMessage::Failed {
            pid,
            error: error.truncated(MAX_MESSAGE_BYTES - 1024),
        }
    }

    /// Failure message carrying only the error kind, sent when the full
    /// report could not be encoded.
    pub fn too_large(pid: u32, error: &JobError) -> Self {
        ChildMessage::Failed {
            pid,
            error: error.too_large(),
        }
    }
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}

/// Encode an envelope as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(envelope: &MessageEnvelope<T>) -> Result<Vec<u8>, IpcError> {
    let mut line = serde_json::to_vec(envelope)?;
    line.push(b'\n');
    if line.len() > MAX_MESSAGE_BYTES {
        return Err(IpcError::MessageTooLarge {
            size: line.len(),
            max: MAX_MESSAGE_BYTES,
        });
    }
    Ok(line)
}

/// Decode one line produced by [`encode_line`], checking the protocol version.
pub fn decode_line<T: DeserializeOwned>(line: &[u8]) -> Result<MessageEnvelope<T>, IpcError> {
    let trimmed = line.strip_suffix(b"\n").unwrap_or(line);
    let envelope: MessageEnvelope<T> = serde_json::from_slice(trimmed)?;

    if !envelope.is_compatible() {
        return Err(IpcError::ProtocolVersionMismatch {
            expected: IPC_PROTOCOL_VERSION,
            actual: envelope.protocol_version,
        });
    }

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_envelope() {
        let envelope = MessageEnvelope::new(ChildMessage::Completed { pid: 7 });
        assert_eq!(envelope.protocol_version, IPC_PROTOCOL_VERSION);
        assert!(envelope.is_compatible());

        let line = encode_line(&envelope).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));

        let decoded: MessageEnvelope<ChildMessage> = decode_line(&line).unwrap();
        assert_eq!(decoded.message, ChildMessage::Completed { pid: 7 });
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut envelope = MessageEnvelope::new(ChildMessage::Completed { pid: 7 });
        envelope.protocol_version = IPC_PROTOCOL_VERSION + 1;
        let line = serde_json::to_vec(&envelope).unwrap();

        let result: Result<MessageEnvelope<ChildMessage>, _> = decode_line(&line);
        assert!(matches!(
            result,
            Err(IpcError::ProtocolVersionMismatch { .. })
        ));
    }

    #[test]
    fn test_oversized_failure_is_truncated_to_fit() {
        let error = JobError::new("RuntimeError", "x".repeat(200_000))
            .with_backtrace((0..10_000).map(|i| format!("frame {}", i)).collect());
        let envelope = MessageEnvelope::new(ChildMessage::failed(1, &error));

        let line = encode_line(&envelope).unwrap();
        assert!(line.len() <= MAX_MESSAGE_BYTES);
    }

    #[test]
    fn test_escaped_failure_message_fits() {
        let error = JobError::new("RuntimeError", "\u{1}".repeat(40_000));
        let envelope = MessageEnvelope::new(ChildMessage::failed(1, &error));

        let line = encode_line(&envelope).unwrap();
        assert!(line.len() <= MAX_MESSAGE_BYTES);
        let decoded: MessageEnvelope<ChildMessage> = decode_line(&line).unwrap();
        match decoded.message {
            ChildMessage::Failed { error, .. } => assert_eq!(error.kind, "RuntimeError"),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_oversized_kind_fits() {
        let error = JobError::new("K".repeat(70_000), "boom");
        let line = encode_line(&MessageEnvelope::new(ChildMessage::failed(1, &error))).unwrap();
        assert!(line.len() <= MAX_MESSAGE_BYTES);
    }

    #[test]
    fn test_too_large_fallback_encodes() {
        let error = JobError::new("RuntimeError", "x".repeat(200_000));
        let line = encode_line(&MessageEnvelope::new(ChildMessage::too_large(3, &error))).unwrap();
        let decoded: MessageEnvelope<ChildMessage> = decode_line(&line).unwrap();
        assert_eq!(
            decoded.message,
            ChildMessage::Failed {
                pid: 3,
                error: JobError::new("RuntimeError", quarry_core::error::MESSAGE_TOO_LARGE),
            }
        );
    }
}
