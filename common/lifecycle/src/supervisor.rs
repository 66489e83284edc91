//! Supervisor: spawns tracked components that share one cancellation token, waits for a
//! shutdown trigger, then cancels and gives components a bounded grace period to exit.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::LifecycleError;
use crate::metrics;
use crate::signals::{ShutdownTrigger, SignalListener};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// How [`Supervisor::shutdown`] spends its grace period.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Sleep for the whole grace period after cancelling, even if every component
    /// exits sooner. Shutdown duration does not depend on the components at all.
    #[default]
    FixedDelay,
    /// Wait on the component tasks, returning early once all of them have exited.
    Drain,
}

impl ShutdownPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownPolicy::FixedDelay => "fixed",
            ShutdownPolicy::Drain => "drain",
        }
    }
}

impl fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseShutdownPolicyError(pub String);

impl fmt::Display for ParseShutdownPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown shutdown policy '{}', expected 'fixed' or 'drain'",
            self.0
        )
    }
}

impl std::error::Error for ParseShutdownPolicyError {}

impl FromStr for ShutdownPolicy {
    type Err = ParseShutdownPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(ShutdownPolicy::FixedDelay),
            "drain" => Ok(ShutdownPolicy::Drain),
            _ => Err(ParseShutdownPolicyError(s.to_owned())),
        }
    }
}

/// Outcome of [`Supervisor::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Time spent between cancelling the token and returning.
    pub elapsed: Duration,
    /// Components whose task had returned when the grace period ended.
    pub completed: Vec<String>,
    /// Components that panicked at any point while supervised.
    pub panicked: Vec<String>,
    /// Components still running at the deadline; their tasks were aborted.
    pub abandoned: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty() && self.panicked.is_empty()
    }
}

pub struct SupervisorBuilder {
    name: String,
    grace_period: Duration,
    policy: ShutdownPolicy,
    trap_signals: bool,
}

impl SupervisorBuilder {
    /// Time components get to exit once shutdown begins (default: 2s).
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Install SIGINT/SIGTERM handlers (default: true). Tests usually turn this off
    /// and drive shutdown through [`Supervisor::request_shutdown`].
    pub fn with_trap_signals(mut self, trap_signals: bool) -> Self {
        self.trap_signals = trap_signals;
        self
    }

    /// Must be called from within a tokio runtime when signals are trapped.
    pub fn build(self) -> Result<Supervisor, LifecycleError> {
        let signals = if self.trap_signals {
            Some(SignalListener::install()?)
        } else {
            None
        };

        Ok(Supervisor {
            name: self.name,
            grace_period: self.grace_period,
            policy: self.policy,
            shutdown_token: CancellationToken::new(),
            signals,
            tasks: Vec::new(),
        })
    }
}

struct TrackedTask {
    name: String,
    handle: JoinHandle<()>,
    panicked: Arc<AtomicBool>,
}

/// Aborts the component task when the supervising wrapper is dropped, so aborting the
/// wrapper at the deadline also stops the component.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Owns the process-wide cancellation token and the join handles of every component
/// spawned through it.
pub struct Supervisor {
    name: String,
    grace_period: Duration,
    policy: ShutdownPolicy,
    shutdown_token: CancellationToken,
    signals: Option<SignalListener>,
    tasks: Vec<TrackedTask>,
}

impl Supervisor {
    pub fn builder(name: &str) -> SupervisorBuilder {
        SupervisorBuilder {
            name: name.to_owned(),
            grace_period: DEFAULT_GRACE_PERIOD,
            policy: ShutdownPolicy::default(),
            trap_signals: true,
        }
    }

    /// Token shared by all components; cancelled exactly once, when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn policy(&self) -> ShutdownPolicy {
        self.policy
    }

    /// Begin shutdown from inside the process, as if a signal had been received.
    pub fn request_shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Spawn a component on the current runtime and track its task. Returns immediately.
    ///
    /// Components are expected to run until the shutdown token is cancelled. One that
    /// returns earlier is treated as dead, and one that panics as failed; either
    /// initiates a global shutdown.
    pub fn spawn<F>(&mut self, name: &str, component: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tag = name.to_owned();
        let service_name = self.name.clone();
        let token = self.shutdown_token.clone();
        let panicked = Arc::new(AtomicBool::new(false));
        let panic_flag = panicked.clone();

        let handle = tokio::spawn(async move {
            let mut component = AbortOnDrop(tokio::spawn(component));
            match (&mut component.0).await {
                Ok(()) if token.is_cancelled() => {
                    debug!(component = %tag, "Lifecycle: component exited");
                }
                Ok(()) => {
                    metrics::emit_component_shutdown_result(&service_name, &tag, "died");
                    warn!(
                        component = %tag,
                        "Lifecycle: component exited before shutdown, initiating shutdown"
                    );
                    token.cancel();
                }
                Err(e) => {
                    panic_flag.store(true, Ordering::SeqCst);
                    metrics::emit_component_shutdown_result(&service_name, &tag, "panicked");
                    error!(
                        component = %tag,
                        error = %e,
                        "Lifecycle: component panicked, initiating shutdown"
                    );
                    token.cancel();
                }
            }
        });

        debug!(component = name, "Lifecycle: component started");
        self.tasks.push(TrackedTask {
            name: name.to_owned(),
            handle,
            panicked,
        });
    }

    /// Suspend until SIGINT, SIGTERM, or an in-process cancellation of the token.
    pub async fn await_shutdown(&mut self) -> ShutdownTrigger {
        let trigger = match self.signals.as_mut() {
            Some(signals) => tokio::select! {
                trigger = signals.recv() => trigger,
                _ = self.shutdown_token.cancelled() => ShutdownTrigger::Requested,
            },
            None => {
                self.shutdown_token.cancelled().await;
                ShutdownTrigger::Requested
            }
        };

        metrics::emit_shutdown_initiated(&self.name, trigger.as_str());
        info!(
            trigger = %trigger,
            "Lifecycle: shutdown signal received, gracefully stopping"
        );
        trigger
    }

    /// Cancel every component, then wait out the grace period according to the policy.
    /// Always returns within the grace period; components still running at the
    /// deadline are aborted and listed as abandoned.
    pub async fn shutdown(mut self) -> ShutdownReport {
        let started = Instant::now();
        let deadline = started + self.grace_period;
        self.shutdown_token.cancel();

        info!(
            policy = %self.policy,
            grace_period_secs = self.grace_period.as_secs_f64(),
            components = self.tasks.len(),
            "Lifecycle: shutdown initiated"
        );

        match self.policy {
            ShutdownPolicy::FixedDelay => tokio::time::sleep_until(deadline).await,
            ShutdownPolicy::Drain => {
                for task in self.tasks.iter_mut() {
                    match tokio::time::timeout_at(deadline, &mut task.handle).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(
                            component = %task.name,
                            error = %e,
                            "Lifecycle: component task failed during shutdown"
                        ),
                        Err(_) => break,
                    }
                }
            }
        }

        let mut completed = Vec::new();
        let mut panicked = Vec::new();
        let mut abandoned = Vec::new();
        for task in self.tasks.drain(..) {
            if task.panicked.load(Ordering::SeqCst) {
                // Already counted and logged when the panic surfaced.
                panicked.push(task.name);
            } else if task.handle.is_finished() {
                metrics::emit_component_shutdown_result(&self.name, &task.name, "completed");
                completed.push(task.name);
            } else {
                task.handle.abort();
                metrics::emit_component_shutdown_result(&self.name, &task.name, "abandoned");
                warn!(
                    component = %task.name,
                    "Lifecycle: component still running after grace period, abandoning"
                );
                abandoned.push(task.name);
            }
        }

        let report = ShutdownReport {
            elapsed: started.elapsed(),
            completed,
            panicked,
            abandoned,
        };

        metrics::emit_shutdown_completed(
            &self.name,
            report.is_clean(),
            report.elapsed.as_secs_f64(),
        );
        if report.is_clean() {
            info!(
                clean = true,
                total_duration_secs = report.elapsed.as_secs_f64(),
                "Lifecycle: shutdown complete"
            );
        } else {
            warn!(
                clean = false,
                total_duration_secs = report.elapsed.as_secs_f64(),
                panicked = ?report.panicked,
                abandoned = ?report.abandoned,
                "Lifecycle: shutdown complete with failed components"
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_shutdown_policy() {
        assert_eq!("fixed".parse(), Ok(ShutdownPolicy::FixedDelay));
        assert_eq!(" Drain ".parse(), Ok(ShutdownPolicy::Drain));
        assert_eq!(
            "eventually".parse::<ShutdownPolicy>(),
            Err(ParseShutdownPolicyError("eventually".to_owned()))
        );
    }

    #[test]
    fn default_policy_is_fixed_delay() {
        assert_eq!(ShutdownPolicy::default(), ShutdownPolicy::FixedDelay);
        assert_eq!(ShutdownPolicy::default().to_string(), "fixed");
    }

    #[test]
    fn report_is_clean_without_abandoned_components() {
        let mut report = ShutdownReport {
            elapsed: Duration::from_secs(2),
            completed: vec!["heartbeat".to_owned()],
            panicked: vec![],
            abandoned: vec![],
        };
        assert!(report.is_clean());

        report.abandoned.push("status-server".to_owned());
        assert!(!report.is_clean());

        report.abandoned.clear();
        report.panicked.push("status-server".to_owned());
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn builder_defaults() {
        let supervisor = Supervisor::builder("test")
            .with_trap_signals(false)
            .build()
            .expect("failed to build supervisor");

        assert_eq!(supervisor.grace_period(), DEFAULT_GRACE_PERIOD);
        assert_eq!(supervisor.policy(), ShutdownPolicy::FixedDelay);
        assert!(!supervisor.is_shutting_down());
    }
}
