//! Append-only request log

use crate::Request;
use parking_lot::RwLock;

/// Every request handed to the dispatcher, in arrival order
#[derive(Debug, Default)]
pub struct RequestLog {
    entries: RwLock<Vec<Request>>,
}

impl RequestLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request
    pub fn record(&self, req: Request) {
        self.entries.write().push(req);
    }

    /// Copy of the log at call time
    pub fn all(&self) -> Vec<Request> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, RequestBuilder};
    use std::sync::Arc;

    #[test]
    fn test_record_keeps_order() {
        let log = RequestLog::new();
        log.record(RequestBuilder::new(Method::Get, "/first").build());
        log.record(RequestBuilder::new(Method::Post, "/second").build());

        let all = log.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].path, "/first");
        assert_eq!(all[1].method, Method::Post);
    }

    #[test]
    fn test_snapshot_does_not_grow() {
        let log = RequestLog::new();
        log.record(RequestBuilder::new(Method::Get, "/a").build());

        let snapshot = log.all();
        log.record(RequestBuilder::new(Method::Get, "/b").build());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_concurrent_records() {
        let log = Arc::new(RequestLog::new());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        log.record(RequestBuilder::new(Method::Get, format!("/{}/{}", i, j)).build());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let all = log.all();
        assert_eq!(all.len(), 200);
        // Per-thread order survives interleaving
        for i in 0..4 {
            let prefix = format!("/{}/", i);
            let seen: Vec<usize> = all
                .iter()
                .filter_map(|r| r.path.strip_prefix(&prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(seen, (0..50).collect::<Vec<_>>());
        }
    }
}
