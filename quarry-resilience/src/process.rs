//! Process liveness probing and signal delivery

use tracing::warn;

use crate::shutdown::ShutdownError;

/// Answers whether a process id on this host is still running
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by `kill(pid, 0)`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        pid_alive(pid)
    }
}

/// True unless the kernel reports the pid as nonexistent.
///
/// A process owned by another user answers `EPERM` and counts as alive.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(Errno::EPERM) => true,
        Err(e) => {
            warn!(pid, error = %e, "Unexpected error probing process, assuming alive");
            true
        }
    }
}

#[cfg(not(unix))]
pub fn pid_alive(pid: u32) -> bool {
    warn!(pid, "Process probing is unsupported on this platform, assuming alive");
    true
}

/// Deliver `signal` to `pid`.
#[cfg(unix)]
pub fn signal_process(pid: u32, signal: nix::sys::signal::Signal) -> Result<(), ShutdownError> {
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|e| ShutdownError::SignalDelivery {
        pid,
        message: e.to_string(),
    })?;
    nix::sys::signal::kill(Pid::from_raw(raw), signal).map_err(|e| {
        ShutdownError::SignalDelivery {
            pid,
            message: e.to_string(),
        }
    })
}
