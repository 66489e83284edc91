use std::fmt;

use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::error::LifecycleError;

/// What caused the supervisor to leave its running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// SIGINT, typically Ctrl+C.
    Interrupt,
    /// SIGTERM, typically sent by a process manager.
    Terminate,
    /// The cancellation token was cancelled from inside the process.
    Requested,
}

impl ShutdownTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownTrigger::Interrupt => "sigint",
            ShutdownTrigger::Terminate => "sigterm",
            ShutdownTrigger::Requested => "requested",
        }
    }
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SIGINT and SIGTERM streams, registered eagerly so a signal delivered before anyone
/// awaits [`SignalListener::recv`] is still observed.
pub struct SignalListener {
    interrupt: Signal,
    terminate: Signal,
}

impl SignalListener {
    /// Must be called from within a tokio runtime.
    pub fn install() -> Result<Self, LifecycleError> {
        let interrupt =
            signal(SignalKind::interrupt()).map_err(|source| LifecycleError::SignalHandler {
                signal: "SIGINT",
                source,
            })?;
        let terminate =
            signal(SignalKind::terminate()).map_err(|source| LifecycleError::SignalHandler {
                signal: "SIGTERM",
                source,
            })?;

        Ok(Self {
            interrupt,
            terminate,
        })
    }

    /// Resolves on the next SIGINT or SIGTERM.
    pub async fn recv(&mut self) -> ShutdownTrigger {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownTrigger::Interrupt,
            _ = self.terminate.recv() => ShutdownTrigger::Terminate,
        }
    }
}
