//! Control socket server
//!
//! A local-only Unix stream socket accepting one JSON request per
//! connection. Connections are handled inline by the accept task, one at a
//! time; the rate limiter and a bounded read protect the daemon from noisy
//! clients.
//!
//! ## Shutdown discipline
//!
//! `stop` flips the running flag, nudges the accept loop, joins it, waits
//! until the in-flight count reaches zero and only then unlinks the socket
//! file - an in-flight handler always gets to send its response.

pub mod handlers;
pub mod protocol;

use std::collections::HashMap;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::daemon::Service;
use crate::util::RateLimiter;
use self::protocol::{error_codes, Request, Response};

pub use self::handlers::HandlerContext;

/// Upper bound on a request body; a single bounded read enforces it.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Response> + Send>>;
pub type Handler = Arc<dyn Fn(Request) -> HandlerFuture + Send + Sync>;

/// Adapt an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |request| Box::pin(f(request)))
}

struct ServerInner {
    socket_path: PathBuf,
    timeout: Duration,
    rate: RateLimiter,
    handlers: Mutex<HashMap<String, Handler>>,
    running: AtomicBool,
    in_flight: AtomicUsize,
    served: AtomicU64,
    drain: Notify,
    shutdown_tx: watch::Sender<bool>,
    accept_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Cheap-clone handle to the control server.
#[derive(Clone)]
pub struct ControlServer {
    inner: Arc<ServerInner>,
}

impl ControlServer {
    pub fn new(socket_path: PathBuf, timeout: Duration, max_requests_per_sec: u32) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ServerInner {
                socket_path,
                timeout,
                rate: RateLimiter::new(max_requests_per_sec),
                handlers: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                served: AtomicU64::new(0),
                drain: Notify::new(),
                shutdown_tx,
                accept_task: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Register (or replace) the handler for a method. Registration
    /// normally happens before `start`; the table lock exists for the case
    /// where it doesn't.
    pub fn register_handler(&self, method: &str, handler: Handler) {
        debug!("registered handler for {method}");
        self.inner
            .handlers
            .lock()
            .expect("handler table lock poisoned")
            .insert(method.to_string(), handler);
    }

    /// Total connections accepted since start.
    pub fn connections_served(&self) -> u64 {
        self.inner.served.load(Ordering::SeqCst)
    }

    /// Bind the socket and launch the accept loop.
    pub async fn start_server(&self) -> anyhow::Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let path = &self.inner.socket_path;
        if path.exists() {
            debug!("removing stale socket file");
            std::fs::remove_file(path).ok();
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let listener = match UnixListener::bind(path) {
            Ok(listener) => listener,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        // World read/write; the socket directory's ACL is the access
        // control for this local-only socket.
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)) {
            warn!("failed to set socket permissions: {e}");
        }

        let _ = self.inner.shutdown_tx.send(false);
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let server = self.clone();
        *self.inner.accept_task.lock().await =
            Some(tokio::spawn(server.accept_loop(listener, shutdown_rx)));

        info!("control server listening on {}", path.display());
        Ok(())
    }

    /// Stop accepting, drain in-flight handlers, unlink the socket.
    pub async fn stop_server(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.inner.shutdown_tx.send(true);
        if let Some(handle) = self.inner.accept_task.lock().await.take() {
            let _ = handle.await;
        }

        // Wait for in-flight handlers; the notified() future is created
        // before the re-check so no wakeup is lost.
        while self.inner.in_flight.load(Ordering::SeqCst) > 0 {
            let notified = self.inner.drain.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }

        if let Err(e) = std::fs::remove_file(&self.inner.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to unlink socket file: {e}");
            }
        }
        info!("control server stopped");
    }

    /// Accept loop: connections are served inline, one at a time, so a
    /// shutdown request is honored between connections, never mid-handler.
    async fn accept_loop(self, listener: UnixListener, mut shutdown_rx: watch::Receiver<bool>) {
        debug!("accept loop started");

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, _)) => self.handle_client(stream).await,
                    Err(e) => {
                        if self.inner.running.load(Ordering::SeqCst) {
                            error!("accept failed: {e}");
                        }
                    }
                },
                _ = shutdown_rx.changed() => break,
            }
        }

        debug!("accept loop ended");
    }

    async fn handle_client(&self, mut stream: UnixStream) {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        self.inner.served.fetch_add(1, Ordering::SeqCst);

        if let Some(response) = self.process_client(&mut stream).await {
            let bytes = response.to_bytes();
            match tokio::time::timeout(self.inner.timeout, stream.write_all(&bytes)).await {
                Ok(Ok(())) => {
                    let _ = stream.shutdown().await;
                }
                Ok(Err(e)) => debug!("failed to send response: {e}"),
                Err(_) => debug!("response send timed out"),
            }
        }

        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.drain.notify_waiters();
    }

    /// Read, rate-limit, parse and dispatch one request. `None` means the
    /// client went away before sending anything.
    async fn process_client(&self, stream: &mut UnixStream) -> Option<Response> {
        let mut buffer = vec![0u8; MAX_MESSAGE_SIZE];
        let read = tokio::time::timeout(self.inner.timeout, stream.read(&mut buffer)).await;
        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!("recv failed: {e}");
                return None;
            }
            Err(_) => {
                debug!("recv timed out");
                return None;
            }
        };
        if n == 0 {
            debug!("client disconnected without data");
            return None;
        }

        if !self.inner.rate.allow() {
            warn!("request rate limit exceeded");
            return Some(Response::err(
                "Rate limit exceeded",
                error_codes::RATE_LIMITED,
            ));
        }

        let request = match Request::parse(&buffer[..n]) {
            Ok(request) => request,
            Err(response) => return Some(response),
        };

        debug!("dispatching {}", request.method);
        Some(self.dispatch(request).await)
    }

    async fn dispatch(&self, request: Request) -> Response {
        let handler = {
            self.inner
                .handlers
                .lock()
                .expect("handler table lock poisoned")
                .get(&request.method)
                .cloned()
        };

        match handler {
            Some(handler) => handler(request).await,
            None => {
                warn!("unknown method: {}", request.method);
                Response::err(
                    format!("Method not found: {}", request.method),
                    error_codes::METHOD_NOT_FOUND,
                )
            }
        }
    }
}

#[async_trait]
impl Service for ControlServer {
    fn name(&self) -> &'static str {
        "control-server"
    }

    fn priority(&self) -> i32 {
        100
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.start_server().await
    }

    async fn stop(&self) {
        self.stop_server().await;
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn is_healthy(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}
