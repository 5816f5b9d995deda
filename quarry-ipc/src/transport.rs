//! Pipe transport between a forked job and its worker
//!
//! The child writes exactly one newline-delimited envelope and exits. The
//! worker drains the read end without blocking, so a write end inherited by
//! an unrelated fork can never stall it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};

use crate::error::IpcError;
use crate::protocol::{decode_line, encode_line, MessageEnvelope};

/// Create a connected pipe for one isolated job.
pub fn result_pipe() -> Result<(PipeReader, PipeWriter), IpcError> {
    let (read, write) = nix::unistd::pipe()?;
    Ok((PipeReader::new(read), PipeWriter::new(write)))
}

/// Sending half, used inside the isolated job
#[derive(Debug)]
pub struct PipeWriter {
    file: File,
}

impl PipeWriter {
    pub fn new(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }

    /// Send one message with newline delimiter
    pub fn send<T: Serialize>(&mut self, message: &MessageEnvelope<T>) -> Result<(), IpcError> {
        let line = encode_line(message)?;
        self.file.write_all(&line)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Receiving half, used by the worker
#[derive(Debug)]
pub struct PipeReader {
    file: File,
    buffer: Vec<u8>,
    eof: bool,
}

impl PipeReader {
    pub fn new(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
            buffer: Vec::new(),
            eof: false,
        }
    }

    /// Make reads return immediately when no data is buffered in the pipe.
    pub fn set_nonblocking(&self) -> Result<(), IpcError> {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is owned by `self.file` and open for the whole call.
        let flags = unsafe { nix::libc::fcntl(fd, nix::libc::F_GETFL) };
        if flags < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        // SAFETY: as above.
        let rc = unsafe { nix::libc::fcntl(fd, nix::libc::F_SETFL, flags | nix::libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Drain whatever the pipe holds and decode the first complete message.
    ///
    /// Returns `Ok(None)` when nothing has been written yet. A partial line
    /// followed by end of file is reported as [`IpcError::ConnectionClosed`].
    pub fn try_receive<T: DeserializeOwned>(
        &mut self,
    ) -> Result<Option<MessageEnvelope<T>>, IpcError> {
        self.drain()?;

        if let Some(end) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            return decode_line(&line).map(Some);
        }

        if self.eof && !self.buffer.is_empty() {
            return Err(IpcError::ConnectionClosed);
        }
        Ok(None)
    }

    /// Move everything currently in the pipe into the local buffer, so a
    /// writer larger than the pipe capacity is never left blocked.
    pub fn drain(&mut self) -> Result<(), IpcError> {
        let mut chunk = [0u8; 8192];
        while !self.eof {
            match self.file.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
