//! Process lifecycle for long-running agents: OS signal trapping, a shared cancellation
//! token, tracked background tasks and a bounded graceful shutdown. Components receive
//! the token, watch it at their own safe checkpoints, and the supervisor gives them a
//! fixed grace period to exit before abandoning them.

mod error;
mod metrics;
mod signals;
mod supervisor;

pub use error::LifecycleError;
pub use signals::{ShutdownTrigger, SignalListener};
pub use supervisor::{
    ParseShutdownPolicyError, ShutdownPolicy, ShutdownReport, Supervisor, SupervisorBuilder,
    DEFAULT_GRACE_PERIOD,
};
pub use tokio_util::sync::CancellationToken;
