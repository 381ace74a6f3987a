//! Upstream HTTP forwarding.
//!
//! # Responsibilities
//! - Build the upstream URL (sandbox origin or local override)
//! - Stream the request body upstream
//! - Stream passthrough responses, buffer and rewrite HTML/JS
//! - Apply the response header pipeline
//!
//! # Design Decisions
//! - No retries: a failed forward is a 502, including a body that stalls or
//!   breaks while it is buffered for rewriting
//! - Rewrite buffers are bounded; exceeding the bound is a rewrite failure
//! - Bodies are never decoded: upstream is asked for identity encoding and
//!   anything still encoded is relayed byte-for-byte

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{self, HeaderMap};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode, Uri};
use axum::response::Response;
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::ProxyError;
use crate::http::request::forward_request_headers;
use crate::http::server::AppState;
use crate::rewrite::{classify, rewrite_body, BodyKind, HtmlRewriteOptions, RewriteError};
use crate::routing::ProxyTarget;
use crate::security::headers::{
    add_permissive_cors, allow_framing, rewrite_loopback_redirect,
    sanitize_rewritten_response_headers, strip_csp_headers, strip_hop_by_hop_headers,
};

/// Absolute upstream URL for `uri` on the target.
///
/// With `host_override` set the sandbox origin is replaced by
/// `http://<override>:<backend_port>` (`ws://` for WebSockets).
pub fn upstream_url(
    target: &ProxyTarget,
    upstream: &UpstreamConfig,
    uri: &Uri,
    websocket: bool,
) -> Result<Url, ProxyError> {
    let mut url = match &upstream.host_override {
        Some(host) => {
            let scheme = if websocket { "ws" } else { "http" };
            let origin = format!("{scheme}://{host}:{}", target.backend_port);
            Url::parse(&origin).map_err(|e| ProxyError::upstream(origin, e))?
        }
        None => {
            let mut url = target.target_origin.clone();
            if websocket && url.set_scheme("wss").is_err() {
                return Err(ProxyError::upstream(
                    target.target_origin.as_str(),
                    "cannot derive wss origin",
                ));
            }
            url
        }
    };
    url.set_path(uri.path());
    url.set_query(uri.query());
    Ok(url)
}

/// Forward one HTTP request and produce the client response.
pub async fn forward_http(
    state: &AppState,
    target: &ProxyTarget,
    parts: Parts,
    body: Body,
    client_addr: SocketAddr,
    public_host: &str,
) -> Result<Response, ProxyError> {
    let url = upstream_url(target, &state.config.upstream, &parts.uri, false)?;
    let headers = forward_request_headers(
        &parts.headers,
        &target.additional_request_headers,
        client_addr,
        public_host,
    );
    let is_head = parts.method == Method::HEAD;

    let mut request = state
        .client
        .request(parts.method.clone(), url.clone())
        .headers(headers);
    if parts.method != Method::GET && !is_head {
        request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    tracing::debug!(
        method = %parts.method,
        target_url = %url,
        "Proxying HTTP request"
    );

    let upstream_timeout = Duration::from_secs(state.config.timeouts.upstream_secs);
    let response = match tokio::time::timeout(upstream_timeout, request.send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return Err(ProxyError::upstream(url.as_str(), e)),
        Err(_) => {
            return Err(ProxyError::upstream(
                url.as_str(),
                format!("no response headers within {}s", upstream_timeout.as_secs()),
            ))
        }
    };

    let status = response.status();
    let headers = strip_hop_by_hop_headers(response.headers().clone());
    let bodiless = is_head || is_bodiless_status(status);
    let kind = if bodiless {
        BodyKind::Passthrough
    } else {
        classify(
            headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            parts.uri.path(),
        )
    };
    let kind = if kind.needs_rewrite() && is_encoded(&headers) {
        tracing::warn!(
            target_url = %url,
            kind = ?kind,
            "Upstream sent an encoded body; relaying without rewrite"
        );
        BodyKind::Passthrough
    } else {
        kind
    };

    if !kind.needs_rewrite() {
        let body = if bodiless {
            Body::empty()
        } else {
            Body::from_stream(response.bytes_stream())
        };
        return Ok(build_response(status, response_headers(headers, target, false), body));
    }

    let limit = state.config.limits.max_rewrite_body_bytes;
    let raw = match tokio::time::timeout(upstream_timeout, read_bounded(response, limit)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(BodyReadError::TooLarge)) => return Err(RewriteError::TooLarge { limit }.into()),
        Ok(Err(BodyReadError::Upstream(e))) => return Err(ProxyError::upstream(url.as_str(), e)),
        Err(_) => {
            return Err(ProxyError::upstream(
                url.as_str(),
                format!("body stalled for {}s", upstream_timeout.as_secs()),
            ))
        }
    };
    let options = HtmlRewriteOptions {
        skip_service_worker: target.skip_service_worker,
        remove_meta_csp: target.remove_meta_csp,
    };
    let rewritten = rewrite_body(kind, &raw, options)?;
    tracing::debug!(
        kind = ?kind,
        original_bytes = raw.len(),
        rewritten_bytes = rewritten.len(),
        "Rewrote response body"
    );

    Ok(build_response(
        status,
        response_headers(headers, target, true),
        Body::from(rewritten),
    ))
}

/// Response header pipeline. CSP and body-derived headers are only touched
/// when the body was rewritten.
pub fn response_headers(headers: HeaderMap, target: &ProxyTarget, rewritten: bool) -> HeaderMap {
    let mut headers = if rewritten {
        strip_csp_headers(headers)
    } else {
        headers
    };
    if target.add_permissive_cors {
        headers = allow_framing(add_permissive_cors(headers));
    }
    headers = rewrite_loopback_redirect(headers, |port| target.rewrite_loopback_host(port));
    if rewritten {
        headers = sanitize_rewritten_response_headers(headers);
    }
    headers
}

fn is_bodiless_status(status: StatusCode) -> bool {
    status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

/// True when `content-encoding` names anything other than identity.
fn is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CONTENT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|coding| !coding.trim().eq_ignore_ascii_case("identity"))
}

enum BodyReadError {
    TooLarge,
    Upstream(reqwest::Error),
}

async fn read_bounded(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, BodyReadError> {
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(BodyReadError::TooLarge);
    }
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(BodyReadError::Upstream)? {
        if buf.len() + chunk.len() > limit {
            return Err(BodyReadError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::HeaderValue;
    use axum::http::Method;

    use crate::config::RouterConfig;
    use crate::routing::{resolve, RouteRequest, RoutingDecision};

    fn target(host: &str) -> ProxyTarget {
        let config = RouterConfig {
            public_domains: vec!["example.com".into()],
            ..RouterConfig::default()
        };
        let request = RouteRequest {
            method: &Method::GET,
            hostname: host,
            pathname: "/",
            search: None,
            headers: &HeaderMap::new(),
        };
        match resolve(&request, &config) {
            RoutingDecision::Proxy(target) => target,
            RoutingDecision::Direct(direct) => panic!("unexpected direct response {direct:?}"),
        }
    }

    #[test]
    fn upstream_url_uses_sandbox_origin() {
        let target = target("port-5173-abc.example.com");
        let uri: Uri = "/app/index.html?x=1".parse().unwrap();
        let url = upstream_url(&target, &UpstreamConfig::default(), &uri, false).unwrap();
        assert_eq!(
            url.as_str(),
            "https://port-5173-morphvm-abc.http.cloud.morph.so/app/index.html?x=1"
        );
        let ws = upstream_url(&target, &UpstreamConfig::default(), &uri, true).unwrap();
        assert_eq!(ws.scheme(), "wss");
    }

    #[test]
    fn upstream_url_honours_override() {
        let target = target("cmux-abc-scope-8080.example.com");
        let upstream = UpstreamConfig {
            host_override: Some("127.0.0.1".into()),
        };
        let uri: Uri = "/ws".parse().unwrap();
        assert_eq!(
            upstream_url(&target, &upstream, &uri, false).unwrap().as_str(),
            "http://127.0.0.1:8080/ws"
        );
        assert_eq!(
            upstream_url(&target, &upstream, &uri, true).unwrap().as_str(),
            "ws://127.0.0.1:8080/ws"
        );
    }

    #[test]
    fn rewritten_responses_lose_csp_and_length() {
        let mut headers = HeaderMap::new();
        headers.insert("content-security-policy", HeaderValue::from_static("default-src 'self'"));
        headers.insert("content-length", HeaderValue::from_static("10"));
        headers.insert("etag", HeaderValue::from_static("\"abc\""));
        headers.insert("location", HeaderValue::from_static("http://localhost:3000/next?a=1"));

        let target = target("port-39378-abc.example.com");
        let out = response_headers(headers.clone(), &target, true);
        assert!(out.get("content-security-policy").is_none());
        assert!(out.get("content-length").is_none());
        assert!(out.get("etag").is_none());
        assert_eq!(out.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(
            out.get("location").unwrap(),
            "https://port-3000-abc.example.com/next?a=1"
        );

        let passthrough = response_headers(headers, &target, false);
        assert!(passthrough.get("content-security-policy").is_some());
        assert_eq!(passthrough.get("content-length").unwrap(), "10");
        assert_eq!(passthrough.get("access-control-allow-origin").unwrap(), "*");
    }

    #[test]
    fn control_port_responses_can_be_framed() {
        let mut headers = HeaderMap::new();
        headers.insert("x-frame-options", HeaderValue::from_static("DENY"));

        let out = response_headers(headers.clone(), &target("port-39378-abc.example.com"), false);
        assert!(out.get("x-frame-options").is_none());

        let out = response_headers(headers, &target("port-5173-abc.example.com"), true);
        assert_eq!(out.get("x-frame-options").unwrap(), "DENY");
    }

    #[test]
    fn encoded_bodies_are_detected() {
        let mut headers = HeaderMap::new();
        assert!(!is_encoded(&headers));
        headers.insert("content-encoding", HeaderValue::from_static("identity"));
        assert!(!is_encoded(&headers));
        headers.insert("content-encoding", HeaderValue::from_static("gzip"));
        assert!(is_encoded(&headers));
    }

    #[test]
    fn non_control_ports_get_no_cors() {
        let out = response_headers(HeaderMap::new(), &target("port-5173-abc.example.com"), true);
        assert!(out.get("access-control-allow-origin").is_none());
    }

    #[test]
    fn bodiless_statuses() {
        assert!(is_bodiless_status(StatusCode::NO_CONTENT));
        assert!(is_bodiless_status(StatusCode::NOT_MODIFIED));
        assert!(is_bodiless_status(StatusCode::SWITCHING_PROTOCOLS));
        assert!(!is_bodiless_status(StatusCode::OK));
    }
}
