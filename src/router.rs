// src/router.rs
//
// URI handler registry. Dispatch is exact-match first, then insertion
// order over `*`-segment wildcard patterns (segment counts must match),
// then the general handler, falling back to a built-in 404 — the order
// specified by the original `handle_request`'s `requestHandlers` lookup
// (http/http_connection.cc) generalised from single-string equality to
// an equal-length, `*`-as-wildcard segment compare.

use crate::connection::HttpConnection;
use crate::http::Message;
use std::collections::HashMap;
use std::sync::Arc;

pub type Handler = Arc<dyn Fn(&Message, &mut HttpConnection) + Send + Sync>;

#[derive(Clone)]
pub struct Router {
    exact: HashMap<String, Handler>,
    patterns: Vec<(Vec<String>, Handler)>,
    general: Option<Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            exact: HashMap::new(),
            patterns: Vec::new(),
            general: None,
        }
    }

    /// Register `handler` for `uri_pattern`. A pattern containing a `*`
    /// segment is matched positionally against same-length request URIs;
    /// a pattern with no `*` is stored for O(1) exact lookup.
    pub fn set_request_handler(&mut self, uri_pattern: &str, handler: Handler) {
        let segments: Vec<String> = uri_pattern.split('/').map(str::to_string).collect();
        if segments.iter().any(|s| s == "*") {
            self.patterns.push((segments, handler));
        } else {
            self.exact.insert(uri_pattern.to_string(), handler);
        }
    }

    pub fn set_general_handler(&mut self, handler: Handler) {
        self.general = Some(handler);
    }

    fn find(&self, uri: &str) -> Option<&Handler> {
        if let Some(h) = self.exact.get(uri) {
            return Some(h);
        }

        let segments: Vec<&str> = uri.split('/').collect();
        for (pattern, handler) in &self.patterns {
            if pattern.len() != segments.len() {
                continue;
            }
            if pattern
                .iter()
                .zip(segments.iter())
                .all(|(p, s)| p == "*" || p == s)
            {
                return Some(handler);
            }
        }
        None
    }

    /// Route `req` to the first matching handler, falling back to the
    /// general handler and then a built-in 404.
    pub fn dispatch(&self, req: &Message, conn: &mut HttpConnection) {
        if let Some(handler) = self.find(&req.uri) {
            handler(req, conn);
            return;
        }
        if let Some(handler) = &self.general {
            handler(req, conn);
            return;
        }
        conn.send_reply(404, "NOT FOUND", None);
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dummy_message(uri: &str) -> Message {
        let mut m = Message::new_request();
        m.uri = uri.to_string();
        m.method = Method::Get;
        m
    }

    fn dummy_conn() -> HttpConnection {
        HttpConnection::new(-1, "127.0.0.1".to_string(), 0)
    }

    #[test]
    fn exact_match_wins_over_pattern() {
        let mut router = Router::new();
        let exact_hits = Arc::new(AtomicUsize::new(0));
        let pattern_hits = Arc::new(AtomicUsize::new(0));

        let e = exact_hits.clone();
        router.set_request_handler(
            "/a/b",
            Arc::new(move |_req, _conn| {
                e.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let p = pattern_hits.clone();
        router.set_request_handler(
            "/a/*",
            Arc::new(move |_req, _conn| {
                p.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(router.find("/a/b").is_some());
        router.find("/a/b").unwrap()(&dummy_message("/a/b"), &mut dummy_conn());
        assert_eq!(exact_hits.load(Ordering::SeqCst), 1);
        assert_eq!(pattern_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wildcard_requires_equal_segment_count() {
        let mut router = Router::new();
        router.set_request_handler("/assets/*", Arc::new(|_req, _conn| {}));
        assert!(router.find("/assets/app.js").is_some());
        assert!(router.find("/assets/js/app.js").is_none());
    }

    #[test]
    fn first_registered_pattern_wins() {
        let mut router = Router::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let f = first.clone();
        router.set_request_handler(
            "/x/*",
            Arc::new(move |_req, _conn| {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let s = second.clone();
        router.set_request_handler(
            "/*/y",
            Arc::new(move |_req, _conn| {
                s.fetch_add(1, Ordering::SeqCst);
            }),
        );

        router.find("/x/y").unwrap()(&dummy_message("/x/y"), &mut dummy_conn());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }
}
