use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use common_metrics::setup_metrics_recorder;
use lifecycle::{ShutdownReport, Supervisor};
use tokio::net::TcpListener;
use tracing::info;

use crate::build_info::BuildInfo;
use crate::config::Config;
use crate::error::AgentError;
use crate::handlers;
use crate::heartbeat::{HeartbeatWorker, IdleHandler, TickHandler};
use crate::server::{self, ServerSettings};

pub const SERVICE_NAME: &str = "host-agent";

pub const STATUS_SERVER: &str = "status-server";
pub const HEARTBEAT: &str = "heartbeat";

/// Everything the agent runs, assembled before any of it is started.
pub struct Components<H> {
    pub listener: TcpListener,
    pub app: Router,
    pub server: ServerSettings,
    pub heartbeat_interval: Duration,
    pub tick_handler: H,
}

/// Spawn the status server and the heartbeat worker under `supervisor`. Returns as soon
/// as both are running; they stop when the supervisor's token is cancelled.
pub fn start<H>(supervisor: &mut Supervisor, components: Components<H>)
where
    H: TickHandler + 'static,
{
    let token = supervisor.shutdown_token();

    supervisor.spawn(
        STATUS_SERVER,
        server::serve(
            components.app,
            components.listener,
            components.server,
            token.clone(),
        ),
    );

    let worker = HeartbeatWorker::new(
        components.heartbeat_interval,
        components.tick_handler,
        token,
    );
    supervisor.spawn(HEARTBEAT, async move {
        worker.run().await;
    });
}

/// Run the agent until SIGINT or SIGTERM (or until a component dies), then shut down
/// within the grace period.
///
/// Fails only during startup: a listener that cannot be bound is fatal and no component
/// is started in that case.
pub async fn run(config: Config, build_info: BuildInfo) -> Result<ShutdownReport, AgentError> {
    let recorder_handle = setup_metrics_recorder()?;
    build_info.record_metric();
    let build_info = Arc::new(build_info);

    let mut supervisor = Supervisor::builder(SERVICE_NAME)
        .with_grace_period(config.shutdown_grace_period.0)
        .with_policy(config.shutdown_policy)
        .build()?;

    let listener = server::bind(&config.bind()).await?;

    start(
        &mut supervisor,
        Components {
            listener,
            app: handlers::app(build_info, Some(recorder_handle)),
            server: config.server_settings(),
            heartbeat_interval: config.heartbeat_interval.0,
            tick_handler: IdleHandler,
        },
    );

    supervisor.await_shutdown().await;
    let report = supervisor.shutdown().await;

    info!(
        completed = ?report.completed,
        panicked = ?report.panicked,
        abandoned = ?report.abandoned,
        "agent stopped"
    );
    Ok(report)
}
