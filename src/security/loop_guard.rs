//! Proxy loop detection.
//!
//! Every request this proxy forwards carries [`LOOP_SENTINEL_HEADER`]. A
//! backend that proxies back through the gateway therefore arrives with the
//! header set and is answered with `508 Loop Detected` instead of recursing.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Sentinel header set on every forwarded request.
pub const LOOP_SENTINEL_HEADER: HeaderName = HeaderName::from_static("x-cmux-proxied");

const SENTINEL_VALUE: HeaderValue = HeaderValue::from_static("true");

/// Returns true if the inbound request already passed through this proxy.
pub fn is_looped(headers: &HeaderMap) -> bool {
    headers.contains_key(LOOP_SENTINEL_HEADER)
}

/// Mark an outbound header set as proxied.
pub fn mark_proxied(headers: &mut HeaderMap) {
    headers.insert(LOOP_SENTINEL_HEADER, SENTINEL_VALUE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sentinel_case_insensitively() {
        let mut headers = HeaderMap::new();
        assert!(!is_looped(&headers));
        headers.insert(
            HeaderName::from_bytes(b"X-Cmux-Proxied").unwrap(),
            HeaderValue::from_static("anything"),
        );
        assert!(is_looped(&headers));
    }

    #[test]
    fn marked_headers_are_detected() {
        let mut headers = HeaderMap::new();
        mark_proxied(&mut headers);
        assert!(is_looped(&headers));
        assert_eq!(headers.get("x-cmux-proxied").unwrap(), "true");
    }
}
