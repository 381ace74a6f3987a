//! Header manipulation for proxied responses.
//!
//! # Responsibilities
//! - Strip Content-Security-Policy headers from rewritten documents
//! - Add permissive CORS headers for the control port, and allow it to be framed
//! - Rewrite redirects that point at a sandbox-local loopback address
//! - Drop headers that describe the original byte stream after a rewrite
//! - Strip hop-by-hop headers in both directions
//!
//! Every stage takes a `HeaderMap` by value and returns the resulting map.
//! When a body was rewritten the stages run in this order:
//!
//! ```text
//! strip_csp_headers → add_permissive_cors → allow_framing
//!     → rewrite_loopback_redirect → sanitize_rewritten_response_headers
//! ```

use std::net::{Ipv4Addr, Ipv6Addr};

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use url::{Host, Url};

const CSP_HEADERS: [&str; 2] = [
    "content-security-policy",
    "content-security-policy-report-only",
];

const BODY_DERIVED_HEADERS: [&str; 6] = [
    "content-encoding",
    "content-length",
    "transfer-encoding",
    "content-md5",
    "content-digest",
    "etag",
];

/// Standard hop-by-hop headers per RFC 7230.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove both Content-Security-Policy variants. No-op when absent.
pub fn strip_csp_headers(mut headers: HeaderMap) -> HeaderMap {
    for name in CSP_HEADERS {
        headers.remove(name);
    }
    headers
}

/// Set CORS headers that allow any origin to call the sandbox.
pub fn add_permissive_cors(mut headers: HeaderMap) -> HeaderMap {
    let entries = [
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        (
            header::ACCESS_CONTROL_ALLOW_METHODS,
            "GET,POST,PUT,DELETE,PATCH,OPTIONS,HEAD",
        ),
        (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
        (header::ACCESS_CONTROL_EXPOSE_HEADERS, "*"),
        (header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"),
        (header::ACCESS_CONTROL_MAX_AGE, "86400"),
    ];
    for (name, value) in entries {
        headers.insert(name, HeaderValue::from_static(value));
    }
    headers
}

/// Drop `X-Frame-Options` so the page can be embedded by another origin.
pub fn allow_framing(mut headers: HeaderMap) -> HeaderMap {
    headers.remove(header::X_FRAME_OPTIONS);
    headers
}

/// Point a loopback `Location` header at the public subdomain for its port.
///
/// The header is left untouched when it is not an absolute URL, when its host
/// is not a loopback address, or when `builder` has no host for the port.
pub fn rewrite_loopback_redirect<F>(mut headers: HeaderMap, builder: F) -> HeaderMap
where
    F: Fn(u16) -> Option<String>,
{
    let Some(location) = headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
    else {
        return headers;
    };
    let Ok(url) = Url::parse(location) else {
        return headers;
    };
    if !url.host().is_some_and(|host| is_loopback_url_host(&host)) {
        return headers;
    }
    let Some(port) = url.port_or_known_default() else {
        return headers;
    };
    let Some(public_host) = builder(port) else {
        return headers;
    };

    let mut rewritten = format!("https://{public_host}{}", url.path());
    if let Some(query) = url.query() {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    if let Ok(value) = HeaderValue::from_str(&rewritten) {
        tracing::debug!(from = %location, to = %rewritten, "Rewrote loopback redirect");
        headers.insert(header::LOCATION, value);
    }
    headers
}

/// Remove headers describing the upstream byte stream. Required whenever the
/// body text was mutated.
pub fn sanitize_rewritten_response_headers(mut headers: HeaderMap) -> HeaderMap {
    for name in BODY_DERIVED_HEADERS {
        headers.remove(name);
    }
    headers
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop_headers(mut headers: HeaderMap) -> HeaderMap {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
    headers
}

/// True for `localhost`, `0.0.0.0`, `::1`, `[::1]`, `::` and `127.0.0.0/8`.
pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim().to_ascii_lowercase();
    if host == "localhost" {
        return true;
    }
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(&host);
    if let Ok(v4) = bare.parse::<Ipv4Addr>() {
        return is_loopback_v4(v4);
    }
    if let Ok(v6) = bare.parse::<Ipv6Addr>() {
        return v6.is_loopback() || v6.is_unspecified();
    }
    false
}

fn is_loopback_url_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => is_loopback_host(domain),
        Host::Ipv4(v4) => is_loopback_v4(*v4),
        Host::Ipv6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

fn is_loopback_v4(addr: Ipv4Addr) -> bool {
    addr.is_loopback() || addr.is_unspecified()
}
