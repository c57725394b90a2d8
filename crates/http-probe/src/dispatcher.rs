//! Request dispatch
//!
//! Records the request, then resolves it against the listener registry,
//! falling back to the default policy. Dispatch is synchronous and total.

use crate::{Listener, ListenerRegistry, Request, RequestLog, Response};
use tracing::debug;

/// Response policy when no listener matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultHandler {
    /// `200 OK` with an empty body
    #[default]
    AlwaysOk,
    /// `404 Not Found` with an empty body
    AlwaysNotFound,
}

impl DefaultHandler {
    pub fn response(&self) -> Response {
        match self {
            DefaultHandler::AlwaysOk => Response::ok(),
            DefaultHandler::AlwaysNotFound => Response::not_found(),
        }
    }
}

/// Shared state handed to every connection
pub struct Dispatcher {
    registry: ListenerRegistry,
    log: RequestLog,
    default_handler: DefaultHandler,
}

impl Dispatcher {
    pub fn new(default_handler: DefaultHandler) -> Self {
        Self {
            registry: ListenerRegistry::new(),
            log: RequestLog::new(),
            default_handler,
        }
    }

    /// Record `req` and resolve it to exactly one response
    pub fn dispatch(&self, req: Request) -> Response {
        self.log.record(req.clone());

        match self.registry.find(&req) {
            Some((index, res)) => {
                debug!(method = %req.method, path = %req.path, listener = index, status = res.status.0, "matched listener");
                res
            }
            None => {
                let res = self.default_handler.response();
                debug!(method = %req.method, path = %req.path, policy = ?self.default_handler, status = res.status.0, "no listener matched");
                res
            }
        }
    }

    pub fn add_listener(&self, listener: Listener) {
        self.registry.add(listener);
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    pub fn log(&self) -> &RequestLog {
        &self.log
    }

    pub fn default_handler(&self) -> DefaultHandler {
        self.default_handler
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DefaultHandler::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MatchSpec, Method, RequestBuilder, StatusCode};
    use std::sync::Arc;

    fn get(path: &str) -> Request {
        RequestBuilder::new(Method::Get, path).build()
    }

    #[test]
    fn test_default_ok_when_empty() {
        let dispatcher = Dispatcher::new(DefaultHandler::AlwaysOk);

        let res = dispatcher.dispatch(get("/some"));
        assert_eq!(res, Response::ok());

        let log = dispatcher.log().all();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].path, "/some");
    }

    #[test]
    fn test_default_not_found() {
        let dispatcher = Dispatcher::new(DefaultHandler::AlwaysNotFound);

        let res = dispatcher.dispatch(get("/missing"));
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert!(res.body.is_empty());
    }

    #[test]
    fn test_listener_then_default() {
        let dispatcher = Dispatcher::new(DefaultHandler::AlwaysOk);
        dispatcher.add_listener(Listener::new(MatchSpec::get("/some"), Response::not_found()));

        assert_eq!(dispatcher.dispatch(get("/some")).status, StatusCode::NOT_FOUND);
        assert_eq!(dispatcher.dispatch(get("/other")).status, StatusCode::OK);
    }

    #[test]
    fn test_two_listeners_and_default() {
        let dispatcher = Dispatcher::default();
        dispatcher.add_listener(Listener::new(MatchSpec::get("/some1"), Response::new(StatusCode(404))));
        dispatcher.add_listener(Listener::new(MatchSpec::get("/some2"), Response::new(StatusCode(502))));

        assert_eq!(dispatcher.dispatch(get("/some1")).status, StatusCode(404));
        assert_eq!(dispatcher.dispatch(get("/some2")).status, StatusCode(502));
        assert_eq!(dispatcher.dispatch(get("/some3")).status, StatusCode(200));
    }

    #[test]
    fn test_every_request_recorded_once_before_responding() {
        let dispatcher = Arc::new(Dispatcher::default());
        let seen = {
            let dispatcher = dispatcher.clone();
            move |_: &Request| {
                // The request being answered is already in the log
                Response::text(dispatcher.log().len().to_string())
            }
        };
        dispatcher.add_listener(Listener::new(MatchSpec::get("/count"), seen));

        assert_eq!(dispatcher.dispatch(get("/x")).status, StatusCode::OK);
        let res = dispatcher.dispatch(get("/count"));
        assert_eq!(res.body_string().as_deref(), Some("2"));
        assert_eq!(dispatcher.log().len(), 2);
    }
}
