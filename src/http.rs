//! Plain-HTTP method dispatch alongside the WebSocket upgrade path (spec
//! §4.8). One optional handler slot per method; an unclaimed method answers
//! 501 Not Implemented, mirroring the teacher's small method -> handler
//! table before it grows into a full routing tree.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Post,
    Put,
    Trace,
}

impl HttpMethod {
    pub fn from_http(method: &http::Method) -> Option<Self> {
        Some(match *method {
            http::Method::CONNECT => Self::Connect,
            http::Method::DELETE => Self::Delete,
            http::Method::GET => Self::Get,
            http::Method::HEAD => Self::Head,
            http::Method::OPTIONS => Self::Options,
            http::Method::POST => Self::Post,
            http::Method::PUT => Self::Put,
            http::Method::TRACE => Self::Trace,
            _ => return None,
        })
    }
}

pub type HttpResponse = Response<Full<Bytes>>;

pub type BoxHttpHandler = Arc<
    dyn Fn(Request<Incoming>) -> Pin<Box<dyn Future<Output = HttpResponse> + Send>>
        + Send
        + Sync,
>;

/// Per-method handler table (spec §4.8). Registered independently of any
/// WebSocket path: a plain request that isn't an upgrade is dispatched here
/// instead, and 501s if nothing claimed that method.
#[derive(Default)]
pub struct HttpDispatcher {
    handlers: HashMap<HttpMethod, BoxHttpHandler>,
}

impl HttpDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn on(&mut self, method: HttpMethod, handler: BoxHttpHandler) {
        self.handlers.insert(method, handler);
    }

    /// Clones out the handler for `method`, if any, without holding any
    /// borrow of `self` past this call — callers that keep `self` behind a
    /// lock (e.g. `RwLock<HttpDispatcher>`) use this to release the lock
    /// before awaiting the handler, then fall back to [`not_implemented`]
    /// themselves if nothing claimed the method.
    pub fn handler_for(&self, method: &http::Method) -> Option<BoxHttpHandler> {
        HttpMethod::from_http(method).and_then(|m| self.handlers.get(&m)).cloned()
    }
}

pub fn not_implemented() -> HttpResponse {
    Response::builder()
        .status(StatusCode::NOT_IMPLEMENTED)
        .body(Full::new(Bytes::new()))
        .expect("static response is always well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unclaimed_method_maps_to_none() {
        let dispatcher = HttpDispatcher::new();
        assert!(HttpMethod::from_http(&http::Method::GET)
            .and_then(|m| dispatcher.handlers.get(&m))
            .is_none());
    }

    #[test]
    fn patch_has_no_http_method_mapping() {
        assert!(HttpMethod::from_http(&http::Method::PATCH).is_none());
    }
}
