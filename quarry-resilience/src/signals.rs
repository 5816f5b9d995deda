//! Operating system signal listener
//!
//! Handlers only enqueue; every state change happens on the listener task
//! through [`ShutdownCoordinator::send`].
//!
//! | signal      | event                           |
//! |-------------|---------------------------------|
//! | `QUIT`      | [`ShutdownSignal::Graceful`]    |
//! | `TERM`/`INT`| [`ShutdownSignal::Immediate`]   |
//! | `USR1`      | [`ShutdownSignal::KillChild`]   |
//! | `USR2`      | [`ShutdownSignal::Pause`]       |
//! | `CONT`      | [`ShutdownSignal::Resume`]      |

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::shutdown::{ShutdownCoordinator, ShutdownError, ShutdownSignal};

/// Install the worker signal handlers and spawn the listener task.
///
/// Must be called from within a tokio runtime. Abort the returned handle to
/// stop listening; the handlers stay installed for the process lifetime.
#[cfg(unix)]
pub fn listen(coordinator: Arc<ShutdownCoordinator>) -> Result<JoinHandle<()>, ShutdownError> {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    fn install(kind: SignalKind, name: &'static str) -> Result<Signal, ShutdownError> {
        signal(kind).map_err(|e| ShutdownError::SignalInstall {
            signal: name,
            message: e.to_string(),
        })
    }

    let mut quit = install(SignalKind::quit(), "QUIT")?;
    let mut term = install(SignalKind::terminate(), "TERM")?;
    let mut int = install(SignalKind::interrupt(), "INT")?;
    let mut usr1 = install(SignalKind::user_defined1(), "USR1")?;
    let mut usr2 = install(SignalKind::user_defined2(), "USR2")?;
    let mut cont = install(SignalKind::from_raw(nix::libc::SIGCONT), "CONT")?;

    Ok(tokio::spawn(async move {
        loop {
            let (name, event) = tokio::select! {
                Some(()) = quit.recv() => ("QUIT", ShutdownSignal::Graceful),
                Some(()) = term.recv() => ("TERM", ShutdownSignal::Immediate),
                Some(()) = int.recv() => ("INT", ShutdownSignal::Immediate),
                Some(()) = usr1.recv() => ("USR1", ShutdownSignal::KillChild),
                Some(()) = usr2.recv() => ("USR2", ShutdownSignal::Pause),
                Some(()) = cont.recv() => ("CONT", ShutdownSignal::Resume),
                else => break,
            };
            info!(signal = name, event = %event, "Received signal");
            coordinator.send(event);
        }
    }))
}

/// Ctrl+C is the only signal available off unix; it maps to an immediate
/// shutdown.
#[cfg(not(unix))]
pub fn listen(coordinator: Arc<ShutdownCoordinator>) -> Result<JoinHandle<()>, ShutdownError> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!(signal = "INT", "Received signal");
            coordinator.send(ShutdownSignal::Immediate);
        }
    }))
}
