//! Ordered listener registry
//!
//! Listeners live in an `ArcSwap<Vec<_>>`. Appending publishes a new vector,
//! so a dispatch in flight keeps reading the snapshot it loaded and never
//! sees a half-written entry.

use crate::{Listener, Request, Response};
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Append-only, registration-ordered collection of listeners
pub struct ListenerRegistry {
    listeners: ArcSwap<Vec<Arc<Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Append a listener; it has the lowest precedence of all registered ones
    pub fn add(&self, listener: Listener) {
        let listener = Arc::new(listener);
        self.listeners.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(listener.clone());
            next
        });
    }

    /// Current listener sequence
    pub fn snapshot(&self) -> Arc<Vec<Arc<Listener>>> {
        self.listeners.load_full()
    }

    pub fn len(&self) -> usize {
        self.listeners.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.load().is_empty()
    }

    /// First matching listener's response, with its registration index
    pub fn find(&self, req: &Request) -> Option<(usize, Response)> {
        self.listeners
            .load()
            .iter()
            .enumerate()
            .find_map(|(index, listener)| listener.try_respond(req).map(|res| (index, res)))
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MatchSpec, Method, RequestBuilder, StatusCode};

    #[test]
    fn test_first_registered_wins() {
        let registry = ListenerRegistry::new();
        registry.add(Listener::new(MatchSpec::get("/some"), Response::new(StatusCode(404))));
        registry.add(Listener::new(MatchSpec::get("/some"), Response::new(StatusCode(502))));

        let req = RequestBuilder::new(Method::Get, "/some").build();
        let (index, res) = registry.find(&req).unwrap();
        assert_eq!(index, 0);
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_general_listener_shadows_later_specific_one() {
        let registry = ListenerRegistry::new();
        registry.add(Listener::new(MatchSpec::get("/some"), Response::new(StatusCode(201))));
        registry.add(Listener::new(
            MatchSpec::get("/some").header("X-Id", "7"),
            Response::new(StatusCode(202)),
        ));

        let req = RequestBuilder::new(Method::Get, "/some").header("X-Id", "7").build();
        assert_eq!(registry.find(&req).unwrap().1.status, StatusCode::CREATED);
    }

    #[test]
    fn test_no_match() {
        let registry = ListenerRegistry::new();
        assert!(registry.is_empty());
        registry.add(Listener::new(MatchSpec::get("/some"), Response::ok()));

        let req = RequestBuilder::new(Method::Get, "/other").build();
        assert!(registry.find(&req).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_adds() {
        let registry = ListenerRegistry::new();
        registry.add(Listener::new(MatchSpec::get("/a"), Response::ok()));

        let before = registry.snapshot();
        registry.add(Listener::new(MatchSpec::get("/b"), Response::ok()));

        assert_eq!(before.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
        assert_eq!(registry.snapshot()[1].spec().path(), "/b");
    }

    #[test]
    fn test_concurrent_adds_are_all_kept() {
        let registry = Arc::new(ListenerRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        let path = format!("/t{}/{}", i, j);
                        registry.add(Listener::new(MatchSpec::get(path), Response::ok()));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 200);
    }
}
