//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the edge proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Subdomain grammar and backend hostname templates.
    pub routing: RouterConfig,

    /// Upstream connection settings.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Body size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Routing configuration.
///
/// Read-only for the life of the process. Hostname templates accept the
/// placeholders `{port}`, `{morph_id}`, `{router_port}` and `{vm_slug}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Public apex domains served by this proxy. The first entry is primary.
    pub public_domains: Vec<String>,

    /// Plaintext body returned for requests to an apex domain.
    pub greeting: String,

    /// Editor/control port. Responses get permissive CORS and a relaxed CSP.
    pub control_port: u16,

    /// Fixed port of the in-VM router that demultiplexes `cmux-` routes.
    pub router_port: u16,

    /// Backend host for `port-<port>-<morph_id>` subdomains.
    pub port_template: String,

    /// Backend host for `cmux-<morph_id>[-<scope>]-<port>` subdomains.
    pub cmux_template: String,

    /// Backend host for `<workspace>-<port>-<vm_slug>` subdomains.
    pub workspace_template: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            public_domains: vec!["cmux.sh".to_string(), "cmux.localhost".to_string()],
            greeting: "cmux!".to_string(),
            control_port: 39378,
            router_port: 39379,
            port_template: "port-{port}-morphvm-{morph_id}.http.cloud.morph.so".to_string(),
            cmux_template: "port-{router_port}-morphvm-{morph_id}.http.cloud.morph.so".to_string(),
            workspace_template: "{vm_slug}.vm.freestyle.sh".to_string(),
        }
    }
}

/// Upstream connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// When set, every proxied request goes to `http://<host_override>:<port>`
    /// instead of the computed sandbox origin. Intended for local development.
    pub host_override: Option<String>,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connect timeout in seconds.
    pub connect_secs: u64,

    /// Time to wait for upstream response headers, in seconds.
    pub upstream_secs: u64,

    /// Overall bound on a single request handler, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            upstream_secs: 30,
            request_secs: 60,
        }
    }
}

/// Body size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum inbound request body size in bytes.
    pub max_request_body_bytes: usize,

    /// Maximum upstream body size that will be buffered for rewriting.
    pub max_rewrite_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_body_bytes: 64 * 1024 * 1024,
            max_rewrite_body_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}
