//! Listeners: partial request specs paired with responders
//!
//! A [`MatchSpec`] always names a method and a path. Header, body and
//! version constraints are optional; a constraint that is not set matches
//! any request.

use crate::{Method, Request, Response, Version};
use bytes::Bytes;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Partial predicate over an incoming request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSpec {
    method: Method,
    path: String,
    headers: SmallVec<[(String, String); 2]>,
    body: Option<Bytes>,
    version: Option<Version>,
}

impl MatchSpec {
    /// Match `method` and `path`, anything else is a wildcard
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: SmallVec::new(),
            body: None,
            version: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Require a header with this exact value; the name is case-insensitive
    ///
    /// Calling this more than once requires all of the headers.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Require this exact body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Require this protocol version
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check whether every constraint in this spec holds for `req`
    pub fn matches(&self, req: &Request) -> bool {
        if self.method != req.method || self.path != req.path {
            return false;
        }

        if !self
            .headers
            .iter()
            .all(|(name, value)| req.has_header(name, value))
        {
            return false;
        }

        if let Some(body) = &self.body {
            if *body != req.body {
                return false;
            }
        }

        match self.version {
            Some(version) => version == req.version,
            None => true,
        }
    }
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        for (name, value) in &self.headers {
            write!(f, " [{}: {}]", name, value)?;
        }
        if let Some(version) = self.version {
            write!(f, " {}", version)?;
        }
        Ok(())
    }
}

/// Produces the response for a matched request
///
/// Implemented for closures `Fn(&Request) -> Response` and for [`Response`]
/// itself, which is cloned on every match.
pub trait Responder: Send + Sync {
    fn respond(&self, req: &Request) -> Response;
}

impl<F> Responder for F
where
    F: Fn(&Request) -> Response + Send + Sync,
{
    fn respond(&self, req: &Request) -> Response {
        self(req)
    }
}

impl Responder for Response {
    fn respond(&self, _req: &Request) -> Response {
        self.clone()
    }
}

/// A registered rule: spec plus responder
#[derive(Clone)]
pub struct Listener {
    spec: MatchSpec,
    responder: Arc<dyn Responder>,
}

impl Listener {
    pub fn new(spec: MatchSpec, responder: impl Responder + 'static) -> Self {
        Self {
            spec,
            responder: Arc::new(responder),
        }
    }

    pub fn spec(&self) -> &MatchSpec {
        &self.spec
    }

    /// Response for `req` if this listener's spec matches it
    pub fn try_respond(&self, req: &Request) -> Option<Response> {
        if self.spec.matches(req) {
            Some(self.responder.respond(req))
        } else {
            None
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("spec", &self.spec).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RequestBuilder, ResponseBuilder, StatusCode};

    fn get(path: &str) -> RequestBuilder {
        RequestBuilder::new(Method::Get, path)
    }

    #[test]
    fn test_method_and_path_must_match() {
        let spec = MatchSpec::get("/some");

        assert!(spec.matches(&get("/some").build()));
        assert!(!spec.matches(&get("/other").build()));
        assert!(!spec.matches(&get("/some/").build()));
        assert!(!spec.matches(&RequestBuilder::new(Method::Post, "/some").build()));
    }

    #[test]
    fn test_query_is_ignored() {
        let spec = MatchSpec::get("/some");
        assert!(spec.matches(&get("/some").query("a=1&b=2").build()));
    }

    #[test]
    fn test_header_constraint() {
        let spec = MatchSpec::get("/some").header("Accept-Encoding", "*");

        assert!(spec.matches(&get("/some").header("accept-encoding", "*").build()));
        assert!(spec.matches(
            &get("/some")
                .header("Host", "localhost")
                .header("Accept-Encoding", "*")
                .build()
        ));
        assert!(!spec.matches(&get("/some").header("Accept-Encoding", "gzip").build()));
        assert!(!spec.matches(&get("/some").header("Accept", "*").build()));
        assert!(!spec.matches(&get("/some").build()));
    }

    #[test]
    fn test_absent_header_constraint_matches_any_headers() {
        let spec = MatchSpec::get("/some");

        assert!(spec.matches(&get("/some").build()));
        assert!(spec.matches(&get("/some").header("X-Anything", "1").build()));
    }

    #[test]
    fn test_multiple_header_constraints_are_conjunctive() {
        let spec = MatchSpec::get("/")
            .header("X-A", "1")
            .header("X-B", "2");

        assert!(spec.matches(&get("/").header("x-b", "2").header("x-a", "1").build()));
        assert!(!spec.matches(&get("/").header("x-a", "1").build()));
    }

    #[test]
    fn test_body_constraint() {
        let spec = MatchSpec::post("/items").body("{\"id\":1}");
        let post = |body: &'static str| RequestBuilder::new(Method::Post, "/items").body(body).build();

        assert!(spec.matches(&post("{\"id\":1}")));
        assert!(!spec.matches(&post("{\"id\": 1}")));
        assert!(!spec.matches(&post("")));

        let any_body = MatchSpec::post("/items");
        assert!(any_body.matches(&post("")));
        assert!(any_body.matches(&post("anything")));
    }

    #[test]
    fn test_version_constraint() {
        let spec = MatchSpec::get("/").version(Version::Http10);

        assert!(spec.matches(&get("/").version(Version::Http10).build()));
        assert!(!spec.matches(&get("/").version(Version::Http11).build()));
        assert!(MatchSpec::get("/").matches(&get("/").version(Version::Http10).build()));
    }

    #[test]
    fn test_listener_with_static_response() {
        let listener = Listener::new(MatchSpec::get("/some"), Response::new(StatusCode::NOT_FOUND));

        let res = listener.try_respond(&get("/some").build()).unwrap();
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert!(listener.try_respond(&get("/other").build()).is_none());
    }

    #[test]
    fn test_listener_with_closure_sees_request() {
        let listener = Listener::new(MatchSpec::post("/echo"), |req: &Request| {
            ResponseBuilder::new(StatusCode::OK).body(req.body.clone()).build()
        });

        let req = RequestBuilder::new(Method::Post, "/echo").body("ping").build();
        let res = listener.try_respond(&req).unwrap();
        assert_eq!(res.body_string().as_deref(), Some("ping"));
    }

    #[test]
    fn test_spec_display() {
        let spec = MatchSpec::get("/some")
            .header("Accept-Encoding", "*")
            .version(Version::Http11);
        assert_eq!(spec.to_string(), "GET /some [Accept-Encoding: *] HTTP/1.1");
    }
}
