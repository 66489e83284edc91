//! HTTP server for the status endpoints: hyper connection handling with read, write and
//! idle timeouts, stopping as soon as the shutdown token is cancelled.
//!
//! The read timeout runs from the first byte of a request head (or from accept, for a
//! new connection) until the request reaches the router. A keep-alive connection
//! waiting for its next request is governed by the idle timeout alone.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::Service;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info, warn};

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Time allowed for a client to send a complete request head.
    pub read_timeout: Duration,
    /// Time allowed for a handler to produce its response; exceeded requests get a 408.
    pub write_timeout: Duration,
    /// Keep-alive connections with no request in flight are closed after this long.
    pub idle_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

pub async fn bind(address: &str) -> Result<TcpListener, AgentError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| AgentError::Bind {
            address: address.to_owned(),
            source,
        })
}

/// Serve `app` on `listener` until `shutdown` is cancelled, then let open connections
/// finish their in-flight request and return.
pub async fn serve(
    app: Router,
    listener: TcpListener,
    settings: ServerSettings,
    shutdown: CancellationToken,
) {
    let app = app.layer(TimeoutLayer::new(settings.write_timeout));

    let builder = AutoBuilder::new(TokioExecutor::new());

    let connections = TaskTracker::new();

    match listener.local_addr() {
        Ok(address) => info!(address = %address, "status server listening"),
        Err(e) => warn!("failed to read status server address: {}", e),
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, remote_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                        continue;
                    }
                };

                // Match axum default: set TCP_NODELAY for low-latency
                if let Err(e) = socket.set_nodelay(true) {
                    warn!("failed to set TCP_NODELAY: {}", e);
                }

                debug!(remote_addr = %remote_addr, "accepted connection");
                connections.spawn(serve_connection(
                    builder.clone(),
                    app.clone(),
                    socket,
                    settings,
                    shutdown.clone(),
                ));
            }
            _ = shutdown.cancelled() => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    connections.close();
    connections.wait().await;

    info!("status server stopped");
}

async fn serve_connection(
    builder: AutoBuilder<TokioExecutor>,
    app: Router,
    socket: TcpStream,
    settings: ServerSettings,
    shutdown: CancellationToken,
) {
    let activity = Arc::new(ConnectionActivity::new());
    let io = ActivityIo {
        inner: socket,
        activity: activity.clone(),
    };

    let service_activity = activity.clone();
    let service = hyper::service::service_fn(move |req: hyper::Request<Incoming>| {
        let mut app = app.clone();
        let request = service_activity.begin_request();
        async move {
            let response = app.call(req.map(axum::body::Body::new)).await;
            drop(request);
            response
        }
    });

    let conn = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let mut closing = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!("connection closed: {}", e);
                }
                break;
            }
            _ = activity.read_expired(settings.read_timeout) => {
                debug!("request not received within the read timeout, dropping connection");
                break;
            }
            _ = activity.idle_for(settings.idle_timeout), if !closing => {
                debug!("closing idle connection");
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
            _ = shutdown.cancelled(), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

const NOT_READING: u64 = u64::MAX;

/// Per-connection request accounting, used to detect idle keep-alive connections and
/// request heads that take too long to arrive. Times are milliseconds since `opened`.
struct ConnectionActivity {
    opened: Instant,
    in_flight: AtomicUsize,
    last_active_ms: AtomicU64,
    /// When the current request head started arriving, or `NOT_READING`.
    read_started_ms: AtomicU64,
    read_started: Notify,
}

impl ConnectionActivity {
    fn new() -> Self {
        Self {
            opened: Instant::now(),
            in_flight: AtomicUsize::new(0),
            last_active_ms: AtomicU64::new(0),
            // A new connection owes us a request head straight away.
            read_started_ms: AtomicU64::new(0),
            read_started: Notify::new(),
        }
    }

    fn since_open_ms(&self) -> u64 {
        u64::try_from(self.opened.elapsed().as_millis()).unwrap_or(u64::MAX - 1)
    }

    fn touch(&self) {
        self.last_active_ms.store(self.since_open_ms(), Ordering::SeqCst);
    }

    /// Bytes arrived on the socket. Between requests, that is the start of a head.
    fn bytes_received(&self) {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return;
        }
        let now = self.since_open_ms();
        if self
            .read_started_ms
            .compare_exchange(NOT_READING, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.touch();
            self.read_started.notify_waiters();
        }
    }

    fn begin_request(self: &Arc<Self>) -> RequestGuard {
        self.read_started_ms.store(NOT_READING, Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
        RequestGuard {
            activity: self.clone(),
        }
    }

    fn is_reading(&self) -> bool {
        self.read_started_ms.load(Ordering::SeqCst) != NOT_READING
    }

    /// Resolves once a request head has been arriving for longer than `timeout`.
    async fn read_expired(&self, timeout: Duration) {
        loop {
            let started = self.read_started.notified();
            let started_ms = self.read_started_ms.load(Ordering::SeqCst);
            if started_ms == NOT_READING {
                started.await;
                continue;
            }

            let deadline = self.opened + Duration::from_millis(started_ms) + timeout;
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }

    /// Resolves once nothing has happened on the connection for `timeout`: no request in
    /// flight and no request head arriving.
    async fn idle_for(&self, timeout: Duration) {
        loop {
            let last_active =
                self.opened + Duration::from_millis(self.last_active_ms.load(Ordering::SeqCst));
            let deadline = last_active + timeout;

            if Instant::now() < deadline {
                tokio::time::sleep_until(deadline).await;
            } else if self.in_flight.load(Ordering::SeqCst) == 0 && !self.is_reading() {
                return;
            } else {
                // Busy; completing the request moves the deadline.
                tokio::time::sleep(timeout).await;
            }
        }
    }
}

struct RequestGuard {
    activity: Arc<ConnectionActivity>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.activity.touch();
        self.activity.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Socket wrapper reporting received bytes to the connection's [`ConnectionActivity`].
struct ActivityIo<T> {
    inner: T,
    activity: Arc<ConnectionActivity>,
}

impl<T: AsyncRead + Unpin> AsyncRead for ActivityIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            if buf.filled().len() > before {
                this.activity.bytes_received();
            }
        }
        poll
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for ActivityIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
