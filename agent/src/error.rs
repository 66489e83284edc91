use thiserror::Error;

/// Errors that stop the agent from starting. All of them are fatal: the process logs
/// and exits non-zero, nothing is retried.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    Config(#[from] envconfig::Error),
    #[error("failed to bind status server to {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("failed to set up process lifecycle: {0}")]
    Lifecycle(#[from] lifecycle::LifecycleError),
}
