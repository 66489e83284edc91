//! Lifecycle error types returned while building a supervisor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Registering a SIGINT/SIGTERM handler with the OS failed.
    #[error("failed to install {signal} handler: {source}")]
    SignalHandler {
        signal: &'static str,
        source: std::io::Error,
    },
}
