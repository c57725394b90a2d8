//! http-probe: embeddable mock HTTP server for tests
//!
//! A [`Probe`] binds an ephemeral local port, records every request it
//! receives and answers each one from an ordered list of listeners,
//! falling back to a fixed default policy when nothing matches.
//!
//! ## Layout
//! - `request` / `response` - immutable HTTP value types
//! - `listener` - partial match specs paired with responders
//! - `registry` / `dispatcher` - first-match-wins resolution
//! - `recorder` - append-only request log
//! - `transport` - hyper/tokio connection handling
//! - `probe` - lifecycle controller

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod error;
pub mod request;
pub mod response;
pub mod listener;
pub mod registry;
pub mod recorder;
pub mod dispatcher;
pub mod transport;
pub mod probe;

// Re-exports
pub use error::{Error, Result};
pub use request::{Method, Request, RequestBuilder, Version};
pub use response::{Response, ResponseBuilder, StatusCode};
pub use listener::{Listener, MatchSpec, Responder};
pub use registry::ListenerRegistry;
pub use recorder::RequestLog;
pub use dispatcher::{DefaultHandler, Dispatcher};
pub use transport::{Binding, ConnectionGuard, ConnectionTracker, HyperTransport, Transport};
pub use probe::{Probe, ProbeConfig, ProbeState};
