//! Probe lifecycle
//!
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`, restartable.
//! Transitions are serialized by an async mutex around the binding, so a
//! probe is never bound twice. Listeners and the request log belong to
//! the probe, not to a binding, and survive restarts.

use crate::transport::DEFAULT_MAX_BODY_SIZE;
use crate::{
    Binding, ConnectionTracker, DefaultHandler, Dispatcher, Error, HyperTransport, Listener,
    MatchSpec, Request, Responder, Result, Transport,
};
use parking_lot::RwLock;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Probe configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// IP literal to bind
    pub hostname: String,
    /// 0 lets the OS pick an ephemeral port
    pub port: u16,
    pub default_handler: DefaultHandler,
    pub keep_alive: bool,
    pub max_body_size: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            port: 0,
            default_handler: DefaultHandler::AlwaysOk,
            keep_alive: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn default_handler(mut self, handler: DefaultHandler) -> Self {
        self.default_handler = handler;
        self
    }

    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    pub fn max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    /// Resolve the bind address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .hostname
            .parse()
            .map_err(|_| Error::InvalidAddress(self.hostname.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    fn transport(&self) -> HyperTransport {
        HyperTransport::new()
            .keep_alive(self.keep_alive)
            .max_body_size(self.max_body_size)
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Stopped,
    Starting,
    Running { port: u16 },
    Stopping,
}

/// Embeddable mock HTTP server
///
/// ```no_run
/// use http_probe::{DefaultHandler, MatchSpec, Probe, Response, StatusCode};
///
/// # async fn run() -> http_probe::Result<()> {
/// let probe = Probe::new(DefaultHandler::AlwaysOk);
/// probe.add_listener(MatchSpec::get("/some"), Response::new(StatusCode::NOT_FOUND));
///
/// let port = probe.start().await?;
/// // ... point the code under test at 127.0.0.1:{port} ...
/// assert!(probe.requests().iter().all(|r| r.path == "/some"));
/// probe.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Probe {
    config: ProbeConfig,
    dispatcher: Arc<Dispatcher>,
    transport: Box<dyn Transport>,
    tracker: Arc<ConnectionTracker>,
    state: RwLock<ProbeState>,
    binding: Mutex<Option<Binding>>,
}

impl Probe {
    /// Probe on an ephemeral loopback port with the given default policy
    pub fn new(default_handler: DefaultHandler) -> Self {
        Self::with_config(ProbeConfig::new().default_handler(default_handler))
    }

    pub fn with_config(config: ProbeConfig) -> Self {
        let transport = config.transport();
        Self::with_transport(config, transport)
    }

    /// Probe served by a custom transport
    pub fn with_transport(config: ProbeConfig, transport: impl Transport + 'static) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(config.default_handler)),
            transport: Box::new(transport),
            tracker: Arc::new(ConnectionTracker::new()),
            state: RwLock::new(ProbeState::Stopped),
            binding: Mutex::new(None),
            config,
        }
    }

    /// Bind and start accepting; returns the bound port
    ///
    /// Already running: returns the current port without rebinding. On a
    /// bind failure the probe stays stopped.
    pub async fn start(&self) -> Result<u16> {
        let mut binding = self.binding.lock().await;
        if let Some(current) = binding.as_ref() {
            debug!(addr = %current.local_addr(), "probe already running");
            return Ok(current.local_addr().port());
        }

        let addr = self.config.socket_addr()?;
        *self.state.write() = ProbeState::Starting;

        match self
            .transport
            .bind(addr, self.dispatcher.clone(), self.tracker.clone())
        {
            Ok(bound) => {
                let port = bound.local_addr().port();
                *binding = Some(bound);
                *self.state.write() = ProbeState::Running { port };
                Ok(port)
            }
            Err(e) => {
                *self.state.write() = ProbeState::Stopped;
                Err(e)
            }
        }
    }

    /// Close the listening socket; a no-op when stopped
    ///
    /// New connections are refused once this returns. Requests already
    /// accepted still get their responses; this does not wait for them
    /// (see [`Probe::wait_idle`]).
    pub async fn stop(&self) {
        let mut binding = self.binding.lock().await;
        let Some(bound) = binding.take() else {
            debug!("probe already stopped");
            return;
        };

        *self.state.write() = ProbeState::Stopping;
        bound.unbind().await;
        *self.state.write() = ProbeState::Stopped;
    }

    /// Wait until no accepted connection is in flight
    ///
    /// Returns false if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.tracker.count() == 0 {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Register a listener after all existing ones
    pub fn add_listener(&self, spec: MatchSpec, responder: impl Responder + 'static) {
        self.add(Listener::new(spec, responder));
    }

    pub fn add(&self, listener: Listener) {
        debug!(spec = %listener.spec(), "adding listener");
        self.dispatcher.add_listener(listener);
    }

    /// Every request received so far, in arrival order
    pub fn requests(&self) -> Vec<Request> {
        self.dispatcher.log().all()
    }

    pub fn request_count(&self) -> usize {
        self.dispatcher.log().len()
    }

    pub fn listener_count(&self) -> usize {
        self.dispatcher.registry().len()
    }

    pub fn default_handler(&self) -> DefaultHandler {
        self.dispatcher.default_handler()
    }

    /// Port from the last `start()`, only while running
    pub fn bound_port(&self) -> Option<u16> {
        match *self.state.read() {
            ProbeState::Running { port } => Some(port),
            _ => None,
        }
    }

    /// `http://host:port{path}` while running
    pub fn url(&self, path: &str) -> Option<String> {
        let port = self.bound_port()?;
        let host = match self.config.socket_addr() {
            Ok(SocketAddr::V6(_)) => format!("[{}]", self.config.hostname),
            _ => self.config.hostname.clone(),
        };
        Some(format!("http://{}:{}{}", host, port, path))
    }

    pub fn state(&self) -> ProbeState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), ProbeState::Running { .. })
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.count()
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }
}

impl Default for Probe {
    fn default() -> Self {
        Self::with_config(ProbeConfig::default())
    }
}
