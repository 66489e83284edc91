use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common_metrics::get_current_timestamp_seconds;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

const METRIC_HEARTBEATS: &str = "agent_heartbeats_total";
const METRIC_HEARTBEAT_FAILURES: &str = "agent_heartbeat_failures_total";
const METRIC_LAST_HEARTBEAT: &str = "agent_last_heartbeat_timestamp_seconds";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Running => "running",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted once per elapsed interval and handed to the [`TickHandler`]. Not retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatTick {
    /// 1-based count of ticks since the worker started.
    pub sequence: u64,
    pub timestamp: OffsetDateTime,
    pub status: AgentStatus,
}

impl HeartbeatTick {
    fn now(sequence: u64) -> Self {
        Self {
            sequence,
            timestamp: OffsetDateTime::now_utc(),
            status: AgentStatus::Running,
        }
    }

    pub fn unix_timestamp(&self) -> i64 {
        self.timestamp.unix_timestamp()
    }
}

#[derive(Debug, Error)]
pub enum TickError {
    #[error("tick handler failed: {0}")]
    Failed(String),
}

impl TickError {
    pub fn failed(reason: impl Into<String>) -> Self {
        TickError::Failed(reason.into())
    }
}

/// Work attached to the heartbeat. The worker awaits each call before waiting for the
/// next interval, so implementations never run concurrently with themselves.
#[async_trait]
pub trait TickHandler: Send + Sync {
    async fn on_tick(&self, tick: &HeartbeatTick) -> Result<(), TickError>;
}

#[async_trait]
impl<T: TickHandler + ?Sized> TickHandler for Arc<T> {
    async fn on_tick(&self, tick: &HeartbeatTick) -> Result<(), TickError> {
        (**self).on_tick(tick).await
    }
}

/// Does nothing. Control-plane polling, task execution and reporting attach here.
pub struct IdleHandler;

#[async_trait]
impl TickHandler for IdleHandler {
    async fn on_tick(&self, _tick: &HeartbeatTick) -> Result<(), TickError> {
        Ok(())
    }
}

pub struct HeartbeatWorker<H> {
    interval: Duration,
    handler: H,
    shutdown: CancellationToken,
}

impl<H: TickHandler> HeartbeatWorker<H> {
    pub fn new(interval: Duration, handler: H, shutdown: CancellationToken) -> Self {
        Self {
            interval,
            handler,
            shutdown,
        }
    }

    /// Tick until the shutdown token is cancelled, returning the number of ticks run.
    ///
    /// The first tick fires one full interval after start. Cancellation is only
    /// checked between ticks: a tick body already running is allowed to finish, and
    /// no heartbeat is emitted once cancellation has been seen.
    pub async fn run(self) -> u64 {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        // A slow tick delays the next one instead of queueing a burst.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.interval.as_secs_f64(),
            "agent loop started"
        );

        let mut sequence = 0;
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            sequence += 1;
            let tick = HeartbeatTick::now(sequence);
            debug!(
                timestamp = tick.unix_timestamp(),
                status = %tick.status,
                sequence,
                "agent heartbeat"
            );
            metrics::counter!(METRIC_HEARTBEATS).increment(1);
            metrics::gauge!(METRIC_LAST_HEARTBEAT).set(get_current_timestamp_seconds());

            if let Err(e) = self.handler.on_tick(&tick).await {
                metrics::counter!(METRIC_HEARTBEAT_FAILURES).increment(1);
                warn!(sequence, error = %e, "agent tick failed");
            }
        }

        info!(ticks = sequence, "agent loop stopped");
        sequence
    }
}
