//! Static JavaScript shipped to the browser.
//!
//! Every script that must survive a second pass through the JS rewriter
//! carries [`NO_REWRITE_MARKER`].

/// Marker that makes `rewrite_javascript` return its input unchanged.
pub const NO_REWRITE_MARKER: &str = "__CMUX_NO_REWRITE__";

/// Attribute identifying the injected location shim in rewritten HTML.
pub const SHIM_MARKER_ATTRIBUTE: &str = "data-cmux-injected";

/// Path the service worker is served from on every subdomain.
pub const SERVICE_WORKER_PATH: &str = "/proxy-sw.js";

/// Location-virtualization shim, injected first in `<head>`.
pub const LOCATION_SHIM_JS: &str = include_str!("assets/location-shim.js");

/// Registers [`SERVICE_WORKER_JS`] with scope `/`.
pub const SW_REGISTRATION_JS: &str = include_str!("assets/sw-register.js");

/// Fallback `__cmuxLocation` aliases for scripts loaded by `src=`.
pub const EXTERNAL_BOOTSTRAP_JS: &str = include_str!("assets/external-bootstrap.js");

/// Service worker body, byte-identical on every response.
pub const SERVICE_WORKER_JS: &str = include_str!("assets/proxy-sw.js");

/// `<script>` block carrying the location shim.
pub fn location_shim_tag() -> String {
    format!("<script {SHIM_MARKER_ATTRIBUTE}=\"location-shim\">{LOCATION_SHIM_JS}</script>")
}

/// `<script>` block registering the service worker.
pub fn sw_registration_tag() -> String {
    format!("<script {SHIM_MARKER_ATTRIBUTE}=\"service-worker\">{SW_REGISTRATION_JS}</script>")
}
