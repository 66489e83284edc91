#![allow(dead_code)]

use std::net::SocketAddr;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpListener;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use host_agent::build_info::BuildInfo;
use host_agent::handlers;
use host_agent::server::{serve, ServerSettings};

pub const TEST_VERSION: &str = "test-1";

pub fn test_build_info() -> Arc<BuildInfo> {
    Arc::new(BuildInfo::new(TEST_VERSION, "abc123", "2024-01-01T00:00:00Z"))
}

/// Status server on an ephemeral port, stopped when the handle is dropped.
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    pub async fn start(settings: ServerSettings) -> ServerHandle {
        Self::for_app(handlers::app(test_build_info(), None), settings).await
    }

    pub async fn for_app(app: axum::Router, settings: ServerSettings) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(serve(app, listener, settings, shutdown.clone()));
        ServerHandle {
            addr,
            shutdown,
            task: Some(task),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Cancel the server and wait for `serve` to return.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            timeout(Duration::from_secs(5), task)
                .await
                .expect("server did not stop")
                .unwrap();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel()
    }
}

/// The compiled `host-agent` binary, with its JSON log lines collected from stdout.
pub struct AgentProcess {
    child: Child,
    stdout: Lines<BufReader<ChildStdout>>,
    pub logs: Vec<Value>,
}

impl AgentProcess {
    pub fn spawn(env: &[(&str, &str)]) -> AgentProcess {
        let mut command = Command::new(env!("CARGO_BIN_EXE_host-agent"));
        command
            .env_clear()
            .env("BIND_HOST", "127.0.0.1")
            .env("BIND_PORT", "0")
            .env("SHUTDOWN_GRACE_PERIOD_MS", "500")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in env {
            command.env(key, value);
        }

        let mut child = command.spawn().expect("failed to spawn host-agent");
        let stdout = child.stdout.take().expect("stdout is piped");

        AgentProcess {
            child,
            stdout: BufReader::new(stdout).lines(),
            logs: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> Option<Value> {
        let line = self.stdout.next_line().await.expect("failed to read stdout")?;
        let value: Value = serde_json::from_str(&line)
            .unwrap_or_else(|e| panic!("log line is not JSON ({e}): {line}"));
        self.logs.push(value.clone());
        Some(value)
    }

    /// Read log lines until one carries `message`, and return it.
    pub async fn wait_for_log(&mut self, message: &str) -> Value {
        timeout(Duration::from_secs(10), async {
            while let Some(line) = self.next_line().await {
                if line["fields"]["message"] == message {
                    return line;
                }
            }
            panic!("agent exited without logging {message:?}: {:?}", self.logs);
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {message:?}"))
    }

    /// The address the status server reported once it started listening.
    pub async fn wait_for_address(&mut self) -> SocketAddr {
        let line = self.wait_for_log("status server listening").await;
        line["fields"]["address"]
            .as_str()
            .expect("address field")
            .parse()
            .expect("address is host:port")
    }

    pub async fn signal(&self, signal: &str) {
        let pid = self.child.id().expect("agent already exited");
        let status = Command::new("kill")
            .args(["-s", signal, &pid.to_string()])
            .status()
            .await
            .expect("failed to run kill");
        assert!(status.success());
    }

    /// Drain the remaining output and wait for the process to exit.
    pub async fn wait_for_exit(&mut self) -> ExitStatus {
        timeout(Duration::from_secs(10), async {
            while self.next_line().await.is_some() {}
            self.child.wait().await.expect("failed to wait for agent")
        })
        .await
        .expect("agent did not exit")
    }

    pub fn messages(&self) -> Vec<&str> {
        self.logs
            .iter()
            .filter_map(|line| line["fields"]["message"].as_str())
            .collect()
    }

    pub fn count(&self, message: &str) -> usize {
        self.messages().iter().filter(|m| **m == message).count()
    }
}
