//! Native HTTP transport
//!
//! Binds the listening socket and runs the accept loop on tokio, serving
//! each connection with hyper's HTTP/1 server:
//! - socket2 socket setup (SO_REUSEADDR, backlog)
//! - TCP_NODELAY per accepted stream
//! - one task per connection
//!
//! The transport parses requests and writes responses; what to answer is
//! entirely up to the [`Dispatcher`].

use crate::{Dispatcher, Error, Method, Request, Response, Result, StatusCode, Version};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use socket2::{Domain, Protocol, Socket, Type};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default cap on collected request bodies (1 MiB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

const LISTEN_BACKLOG: i32 = 1024;

/// Pause after a failed `accept` so fd exhaustion does not spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Capability to serve a dispatcher on a socket
///
/// `bind` must be called from within a tokio runtime. The returned
/// [`Binding`] owns the listening socket until [`Binding::unbind`].
pub trait Transport: Send + Sync {
    fn bind(
        &self,
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        tracker: Arc<ConnectionTracker>,
    ) -> Result<Binding>;
}

/// A bound, accepting listener
#[derive(Debug)]
pub struct Binding {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    accept_task: JoinHandle<()>,
}

impl Binding {
    /// Wrap an accept loop that exits (dropping its listener) when
    /// `shutdown_tx` fires or is dropped.
    pub fn new(
        local_addr: SocketAddr,
        shutdown_tx: oneshot::Sender<()>,
        accept_task: JoinHandle<()>,
    ) -> Self {
        Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            accept_task,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close the listening socket
    ///
    /// Returns once the accept loop has exited. Connections it already
    /// handed off keep running on their own tasks.
    pub async fn unbind(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Err(e) = (&mut self.accept_task).await {
            if !e.is_cancelled() {
                warn!(addr = %self.local_addr, error = %e, "accept loop ended abnormally");
            }
        }
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        // Dropped without unbind: signal the loop, it closes on its own
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Tracks in-flight connections
///
/// Outlives individual bindings, so connections accepted before a
/// restart are still counted.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    active: AtomicU64,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn decrement(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Count a connection until the returned guard is dropped
    ///
    /// The guard also decrements when its task unwinds from a panic.
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.increment();
        ConnectionGuard {
            tracker: Arc::clone(self),
        }
    }
}

/// Keeps one connection counted in a [`ConnectionTracker`]
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.decrement();
    }
}

/// hyper + tokio transport speaking HTTP/1.0 and HTTP/1.1
#[derive(Debug, Clone)]
pub struct HyperTransport {
    keep_alive: bool,
    max_body_size: usize,
}

impl HyperTransport {
    pub fn new() -> Self {
        Self {
            keep_alive: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Keep connections open between requests
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Larger bodies are answered with 413 and never reach the dispatcher
    pub fn max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HyperTransport {
    fn bind(
        &self,
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        tracker: Arc<ConnectionTracker>,
    ) -> Result<Binding> {
        tokio::runtime::Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;

        let std_listener =
            create_listener_socket(&addr).map_err(|source| Error::Bind { addr, source })?;
        let listener = tokio::net::TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "probe listening");

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let keep_alive = self.keep_alive;
        let max_body_size = self.max_body_size;

        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(conn) => conn,
                            Err(e) => {
                                back_off_after_accept_error(local_addr, &e).await;
                                continue;
                            }
                        };

                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%peer, error = %e, "could not set TCP_NODELAY");
                        }

                        let dispatcher = dispatcher.clone();
                        let guard = tracker.track();

                        tokio::spawn(async move {
                            let _guard = guard;
                            serve_connection(stream, peer, dispatcher, keep_alive, max_body_size).await;
                        });
                    }
                }
            }

            drop(listener);
            info!(%local_addr, "probe listener closed");
        });

        Ok(Binding::new(local_addr, shutdown_tx, accept_task))
    }
}

async fn back_off_after_accept_error(local_addr: SocketAddr, error: &std::io::Error) {
    warn!(%local_addr, %error, "accept failed");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    keep_alive: bool,
    max_body_size: usize,
) {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;

    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let dispatcher = dispatcher.clone();
        async move { handle_request(&dispatcher, req, max_body_size).await }
    });

    if let Err(e) = http1::Builder::new()
        .keep_alive(keep_alive)
        .serve_connection(io, service)
        .await
    {
        // Clients hanging up early is routine in tests
        if !e.is_incomplete_message() && !e.is_closed() {
            warn!(%peer, error = %e, "connection error");
        }
    }
}

async fn handle_request(
    dispatcher: &Dispatcher,
    req: hyper::Request<Incoming>,
    max_body_size: usize,
) -> std::result::Result<hyper::Response<Full<Bytes>>, Infallible> {
    let res = match from_hyper_request(req, max_body_size).await {
        Ok(request) => dispatcher.dispatch(request),
        Err(status) => Response::new(status),
    };
    Ok(to_hyper_response(res))
}

/// Convert a hyper request into a [`Request`], collecting the body
///
/// Requests the model cannot represent are rejected with the status to
/// answer; they are never dispatched or recorded.
pub async fn from_hyper_request(
    req: hyper::Request<Incoming>,
    max_body_size: usize,
) -> std::result::Result<Request, StatusCode> {
    let (parts, body) = req.into_parts();

    let method = match method_from_http(&parts.method) {
        Some(method) => method,
        None => {
            warn!(method = %parts.method, "rejecting request");
            return Err(StatusCode::NOT_IMPLEMENTED);
        }
    };

    let version = match parts.version {
        http::Version::HTTP_10 => Version::Http10,
        http::Version::HTTP_11 => Version::Http11,
        other => {
            warn!(version = ?other, "rejecting request");
            return Err(StatusCode::HTTP_VERSION_NOT_SUPPORTED);
        }
    };

    let body = match Limited::new(body, max_body_size).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(limit = max_body_size, "rejecting oversized body");
            return Err(StatusCode::PAYLOAD_TOO_LARGE);
        }
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    let mut request = Request::new(method, parts.uri.path());
    request.query = parts.uri.query().map(|s| s.to_string());
    request.version = version;
    request.body = body;

    // Values outside visible ASCII are kept, undecodable bytes become U+FFFD
    for (name, value) in &parts.headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        request.headers.push((name.to_string(), value));
    }

    Ok(request)
}

/// Method tokens are case-sensitive; `get` is an extension method, not GET
fn method_from_http(method: &http::Method) -> Option<Method> {
    let method = match *method {
        http::Method::GET => Method::Get,
        http::Method::POST => Method::Post,
        http::Method::PUT => Method::Put,
        http::Method::DELETE => Method::Delete,
        http::Method::PATCH => Method::Patch,
        http::Method::HEAD => Method::Head,
        http::Method::OPTIONS => Method::Options,
        http::Method::CONNECT => Method::Connect,
        http::Method::TRACE => Method::Trace,
        _ => return None,
    };
    Some(method)
}

/// Convert our Response to a hyper Response
///
/// A response hyper cannot encode (bad header name, status out of range)
/// becomes an empty 500.
pub fn to_hyper_response(res: Response) -> hyper::Response<Full<Bytes>> {
    let mut builder = hyper::Response::builder().status(res.status.as_u16());

    for (name, value) in &res.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    match builder.body(Full::new(res.body)) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "responder produced an invalid response");
            let mut response = hyper::Response::new(Full::new(Bytes::new()));
            *response.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

/// Create a non-blocking listening socket bound to `addr`
pub fn create_listener_socket(addr: &SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // SO_REUSEADDR - allow rebinding a fixed port still in TIME_WAIT
    socket.set_reuse_address(true)?;

    socket.bind(&(*addr).into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}
