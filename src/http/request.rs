//! Request handling and transformation.
//!
//! # Responsibilities
//! - Extract routing-relevant information (host, path, query)
//! - Detect WebSocket upgrades
//! - Prepare the header set forwarded to the sandbox
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Client-supplied internal demultiplexing headers are never trusted

use std::net::SocketAddr;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::request::Parts;

use crate::security::headers::strip_hop_by_hop_headers;

/// Correlation header set on every request and echoed on the response.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Client headers carried onto the upstream WebSocket handshake.
pub const WEBSOCKET_FORWARDED_HEADERS: [HeaderName; 5] = [
    header::SEC_WEBSOCKET_PROTOCOL,
    header::ORIGIN,
    header::COOKIE,
    header::AUTHORIZATION,
    header::USER_AGENT,
];

/// Host the client addressed, from the Host header or an absolute URI.
pub fn request_host(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
}

/// True for an HTTP/1.1 `Upgrade: websocket` request.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    upgrade && connection
}

/// Header names like `x-cmux-port-internal` that only the proxy may set.
fn is_internal_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    name.starts_with("x-cmux-") && name.ends_with("-internal")
}

/// Build the header set for a forwarded HTTP request.
///
/// Hop-by-hop, `host` and `accept-encoding` are dropped, the
/// `x-forwarded-*` trio is set and `additional` overrides the rest.
pub fn forward_request_headers(
    inbound: &HeaderMap,
    additional: &HeaderMap,
    client_addr: SocketAddr,
    public_host: &str,
) -> HeaderMap {
    let mut headers = strip_hop_by_hop_headers(inbound.clone());
    headers.remove(header::HOST);
    headers.remove(header::ACCEPT_ENCODING);

    let internal: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_internal_header(name))
        .cloned()
        .collect();
    for name in internal {
        headers.remove(name);
    }

    apply_forwarded_headers(&mut headers, inbound, client_addr, public_host);

    for (name, value) in additional {
        headers.insert(name.clone(), value.clone());
    }
    headers
}

/// Header set for the upstream WebSocket handshake.
pub fn forward_websocket_headers(
    inbound: &HeaderMap,
    additional: &HeaderMap,
    client_addr: SocketAddr,
    public_host: &str,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in WEBSOCKET_FORWARDED_HEADERS {
        for value in inbound.get_all(&name) {
            headers.append(name.clone(), value.clone());
        }
    }
    apply_forwarded_headers(&mut headers, inbound, client_addr, public_host);
    for (name, value) in additional {
        headers.insert(name.clone(), value.clone());
    }
    headers
}

fn apply_forwarded_headers(
    headers: &mut HeaderMap,
    inbound: &HeaderMap,
    client_addr: SocketAddr,
    public_host: &str,
) {
    let client_ip = client_addr.ip().to_string();
    let forwarded_for = match inbound
        .get(&X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {client_ip}"),
        _ => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if let Ok(value) = HeaderValue::from_str(public_host) {
        headers.insert(X_FORWARDED_HOST, value);
    }

    let proto = inbound
        .get(&X_FORWARDED_PROTO)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("http"));
    headers.insert(X_FORWARDED_PROTO, proto);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn client() -> SocketAddr {
        "203.0.113.7:51000".parse().unwrap()
    }

    fn additional() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-cmux-proxied", HeaderValue::from_static("true"));
        headers.insert("x-cmux-port-internal", HeaderValue::from_static("8080"));
        headers
    }

    #[test]
    fn host_comes_from_header_or_authority() {
        let (parts, _) = Request::builder()
            .uri("/path")
            .header("host", "port-1-a.example.com:8090")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(request_host(&parts).as_deref(), Some("port-1-a.example.com:8090"));

        let (parts, _) = Request::builder()
            .uri("http://cmux-a-80.example.com/x")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(request_host(&parts).as_deref(), Some("cmux-a-80.example.com"));
    }

    #[test]
    fn detects_websocket_upgrade() {
        let mut headers = HeaderMap::new();
        headers.insert("upgrade", HeaderValue::from_static("WebSocket"));
        assert!(!is_websocket_upgrade(&headers));
        headers.insert("connection", HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(is_websocket_upgrade(&headers));
        headers.insert("upgrade", HeaderValue::from_static("h2c"));
        assert!(!is_websocket_upgrade(&headers));
    }

    #[test]
    fn forwarded_request_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert("host", HeaderValue::from_static("port-1-a.example.com"));
        inbound.insert("accept-encoding", HeaderValue::from_static("gzip, br"));
        inbound.insert("connection", HeaderValue::from_static("keep-alive, x-drop"));
        inbound.insert("x-drop", HeaderValue::from_static("1"));
        inbound.insert("x-cmux-workspace-internal", HeaderValue::from_static("spoofed"));
        inbound.insert("x-cmux-port-internal", HeaderValue::from_static("1"));
        inbound.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1"));
        inbound.insert("cookie", HeaderValue::from_static("a=b"));

        let host = "port-1-a.example.com";
        let out = forward_request_headers(&inbound, &additional(), client(), host);
        assert!(out.get("host").is_none());
        assert!(out.get("accept-encoding").is_none());
        assert!(out.get("connection").is_none());
        assert!(out.get("x-drop").is_none());
        assert!(out.get("x-cmux-workspace-internal").is_none());
        assert_eq!(out.get("x-cmux-port-internal").unwrap(), "8080");
        assert_eq!(out.get("x-cmux-proxied").unwrap(), "true");
        assert_eq!(out.get("cookie").unwrap(), "a=b");
        assert_eq!(out.get("x-forwarded-for").unwrap(), "198.51.100.1, 203.0.113.7");
        assert_eq!(out.get("x-forwarded-host").unwrap(), "port-1-a.example.com");
        assert_eq!(out.get("x-forwarded-proto").unwrap(), "http");
    }

    #[test]
    fn websocket_headers_are_selective() {
        let mut inbound = HeaderMap::new();
        inbound.insert("sec-websocket-protocol", HeaderValue::from_static("vite-hmr"));
        inbound.insert("sec-websocket-key", HeaderValue::from_static("abc"));
        inbound.insert("origin", HeaderValue::from_static("https://app.example.com"));
        inbound.insert("x-forwarded-proto", HeaderValue::from_static("https"));

        let out = forward_websocket_headers(&inbound, &additional(), client(), "h.example.com");
        assert_eq!(out.get("sec-websocket-protocol").unwrap(), "vite-hmr");
        assert_eq!(out.get("origin").unwrap(), "https://app.example.com");
        assert!(out.get("sec-websocket-key").is_none());
        assert_eq!(out.get("x-forwarded-proto").unwrap(), "https");
        assert_eq!(out.get("x-forwarded-for").unwrap(), "203.0.113.7");
        assert_eq!(out.get("x-cmux-proxied").unwrap(), "true");
    }
}
