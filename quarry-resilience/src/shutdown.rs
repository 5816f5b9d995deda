//! Shutdown coordination
//!
//! Operating system signals and programmatic requests are both turned into
//! [`ShutdownSignal`] events. The coordinator records the resulting state in
//! atomic flags, which a worker checks at its safe points, and broadcasts
//! the event so a worker blocked on a sleep or a running job wakes up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Lifecycle requests a worker reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownSignal {
    /// Finish the current job, then exit (QUIT)
    Graceful,
    /// Stop now, terminating the current job if configured to (TERM, INT)
    Immediate,
    /// Kill the current job, keep working (USR1)
    KillChild,
    /// Stop reserving jobs (USR2)
    Pause,
    /// Resume reserving jobs (CONT)
    Resume,
}

impl ShutdownSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownSignal::Graceful => "graceful",
            ShutdownSignal::Immediate => "immediate",
            ShutdownSignal::KillChild => "kill_child",
            ShutdownSignal::Pause => "pause",
            ShutdownSignal::Resume => "resume",
        }
    }
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shutdown error types
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// A signal handler could not be installed
    #[error("Failed to install handler for {signal}: {message}")]
    SignalInstall { signal: &'static str, message: String },

    /// Delivering a signal to a process failed
    #[error("Failed to signal process {pid}: {message}")]
    SignalDelivery { pid: u32, message: String },
}

/// Shared shutdown and pause state of one worker
#[derive(Debug)]
pub struct ShutdownCoordinator {
    sender: broadcast::Sender<ShutdownSignal>,
    shutting_down: AtomicBool,
    immediate: AtomicBool,
    paused: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);

        Self {
            sender,
            shutting_down: AtomicBool::new(false),
            immediate: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.sender.subscribe()
    }

    /// Record `signal` and wake every subscriber.
    pub fn send(&self, signal: ShutdownSignal) {
        match signal {
            ShutdownSignal::Graceful => {
                info!("Graceful shutdown requested");
                self.shutting_down.store(true, Ordering::SeqCst);
            }
            ShutdownSignal::Immediate => {
                info!("Immediate shutdown requested");
                self.shutting_down.store(true, Ordering::SeqCst);
                self.immediate.store(true, Ordering::SeqCst);
            }
            ShutdownSignal::KillChild => {
                info!("Kill of current job requested");
            }
            ShutdownSignal::Pause => {
                info!("Pausing job reservation");
                self.paused.store(true, Ordering::SeqCst);
            }
            ShutdownSignal::Resume => {
                info!("Resuming job reservation");
                self.paused.store(false, Ordering::SeqCst);
            }
        }

        // Nobody listening is fine, the flags above carry the state.
        if self.sender.send(signal).is_err() {
            debug!(%signal, "No subscribers for lifecycle event");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Cloneable handle for embedders and tests
    pub fn handle(self: &Arc<Self>) -> ShutdownHandle {
        ShutdownHandle {
            coordinator: Arc::clone(self),
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Programmatic equivalent of the worker's signal set
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    coordinator: Arc<ShutdownCoordinator>,
}

impl ShutdownHandle {
    /// Same as QUIT.
    pub fn shutdown(&self) {
        self.coordinator.send(ShutdownSignal::Graceful);
    }

    /// Same as TERM or INT.
    pub fn shutdown_now(&self) {
        self.coordinator.send(ShutdownSignal::Immediate);
    }

    /// Same as USR1.
    pub fn kill_child(&self) {
        self.coordinator.send(ShutdownSignal::KillChild);
    }

    /// Same as USR2.
    pub fn pause(&self) {
        self.coordinator.send(ShutdownSignal::Pause);
    }

    /// Same as CONT.
    pub fn resume(&self) {
        self.coordinator.send(ShutdownSignal::Resume);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.coordinator.is_shutting_down()
    }

    pub fn is_paused(&self) -> bool {
        self.coordinator.is_paused()
    }

    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }
}
