//! Routing decision types.

use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use url::Url;

use crate::error::ProxyError;
use crate::routing::schemes::SubdomainScheme;

/// Outcome of resolving a single request.
#[derive(Debug, Clone)]
pub enum RoutingDecision {
    /// Answer without contacting any backend.
    Direct(DirectResponse),
    /// Forward to a sandbox origin.
    Proxy(ProxyTarget),
}

/// A response produced by the proxy itself.
#[derive(Debug, Clone)]
pub struct DirectResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl DirectResponse {
    /// Plaintext response with the given status.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self {
            status,
            headers,
            body: Some(Bytes::from(body.into())),
        }
    }

    /// Response with no body.
    pub fn empty(status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            status,
            headers,
            body: None,
        }
    }

    /// Body as UTF-8 text, if any.
    pub fn body_text(&self) -> Option<&str> {
        self.body
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }
}

impl IntoResponse for DirectResponse {
    fn into_response(self) -> Response {
        let body = self.body.map(Body::from).unwrap_or_else(Body::empty);
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl From<ProxyError> for DirectResponse {
    fn from(err: ProxyError) -> Self {
        DirectResponse::text(err.status(), err.public_message())
    }
}

/// Where and how to forward a request.
///
/// `target_origin` is always an `https` URL and `additional_request_headers`
/// always carries the loop sentinel.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    /// Origin of the sandbox backend, without path.
    pub target_origin: Url,
    /// Port requested by the subdomain.
    pub backend_port: u16,
    /// Parsed subdomain, used to rebuild public hostnames.
    pub scheme: SubdomainScheme,
    /// Public domain the request arrived on.
    pub public_domain: String,
    /// Headers that override or extend the forwarded request headers.
    pub additional_request_headers: HeaderMap,
    pub add_permissive_cors: bool,
    pub skip_service_worker: bool,
    pub remove_meta_csp: bool,
}

impl ProxyTarget {
    /// Public hostname that reaches `port` in the same sandbox.
    pub fn rewrite_loopback_host(&self, port: u16) -> Option<String> {
        if port == 0 {
            return None;
        }
        Some(self.scheme.public_host(port, &self.public_domain))
    }

    /// Short label for logs and metrics.
    pub fn route_label(&self) -> &'static str {
        self.scheme.label()
    }
}
