//! Route resolution.
//!
//! # Responsibilities
//! - Normalize the Host header and find the public domain it belongs to
//! - Answer apex, health, service-worker and loop requests directly
//! - Dispatch the subdomain through the scheme parsers
//! - Build the `ProxyTarget` for the matched scheme
//!
//! # Design Decisions
//! - Pure and deterministic: no I/O, no shared mutable state
//! - Loop detection runs before any subdomain parsing
//! - Resolution never depends on whether the request is an upgrade

use axum::body::Bytes;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use url::Url;

use crate::config::RouterConfig;
use crate::error::ProxyError;
use crate::rewrite::assets::{SERVICE_WORKER_JS, SERVICE_WORKER_PATH};
use crate::routing::decision::{DirectResponse, ProxyTarget, RoutingDecision};
use crate::routing::schemes::{parse_subdomain, SubdomainError, SubdomainScheme};
use crate::security::headers::add_permissive_cors;
use crate::security::loop_guard::{is_looped, mark_proxied};

/// Demultiplexing header naming the in-sandbox port.
pub const PORT_HEADER: HeaderName = HeaderName::from_static("x-cmux-port-internal");

/// Demultiplexing header naming the workspace scope.
pub const WORKSPACE_HEADER: HeaderName = HeaderName::from_static("x-cmux-workspace-internal");

/// Routing-relevant view of an inbound request.
#[derive(Debug, Clone, Copy)]
pub struct RouteRequest<'a> {
    pub method: &'a Method,
    /// Raw Host value; may carry a port.
    pub hostname: &'a str,
    pub pathname: &'a str,
    pub search: Option<&'a str>,
    pub headers: &'a HeaderMap,
}

/// Resolve a request to exactly one routing decision.
pub fn resolve(request: &RouteRequest<'_>, config: &RouterConfig) -> RoutingDecision {
    let hostname = normalize_host(request.hostname);

    if config.public_domains.iter().any(|d| *d == hostname) {
        return RoutingDecision::Direct(DirectResponse::text(
            StatusCode::OK,
            config.greeting.clone(),
        ));
    }

    let Some((sub, domain)) = split_public_host(&hostname, config) else {
        if request.pathname == "/health" {
            return RoutingDecision::Direct(health_response());
        }
        return RoutingDecision::Direct(ProxyError::NotFound.into());
    };

    if request.pathname == SERVICE_WORKER_PATH {
        return RoutingDecision::Direct(service_worker_response());
    }

    if is_looped(request.headers) {
        tracing::warn!(
            host = %hostname,
            path = %request.pathname,
            "Loop detected"
        );
        return RoutingDecision::Direct(ProxyError::Loop.into());
    }

    let scheme = match parse_subdomain(sub) {
        Ok(scheme) => scheme,
        Err(err) => {
            tracing::warn!(
                host = %hostname,
                path = %request.pathname,
                reason = %err,
                "Rejected malformed subdomain"
            );
            return RoutingDecision::Direct(ProxyError::Client(err).into());
        }
    };

    let is_control_port = scheme.port() == config.control_port;
    if matches!(scheme, SubdomainScheme::Port { .. })
        && is_control_port
        && *request.method == Method::OPTIONS
    {
        return RoutingDecision::Direct(DirectResponse::empty(
            StatusCode::NO_CONTENT,
            add_permissive_cors(HeaderMap::new()),
        ));
    }

    let backend_host = scheme.backend_host(config);
    let Ok(target_origin) = Url::parse(&format!("https://{backend_host}")) else {
        tracing::warn!(host = %hostname, backend = %backend_host, "Unusable backend host");
        return RoutingDecision::Direct(ProxyError::Client(SubdomainError::WorkspaceShape).into());
    };

    let (permissive_cors, skip_service_worker) = match scheme {
        SubdomainScheme::Port { .. } => (is_control_port, is_control_port),
        // The service worker only understands the port- grammar.
        SubdomainScheme::Cmux { .. } => (is_control_port, true),
        SubdomainScheme::Workspace { .. } => (false, false),
    };

    let mut additional_request_headers = HeaderMap::new();
    mark_proxied(&mut additional_request_headers);
    match &scheme {
        SubdomainScheme::Port { .. } => {}
        SubdomainScheme::Cmux { scope, port, .. } => {
            additional_request_headers.insert(PORT_HEADER, HeaderValue::from(*port));
            if let Some(scope) = scope {
                if let Ok(value) = HeaderValue::from_str(scope) {
                    additional_request_headers.insert(WORKSPACE_HEADER, value);
                }
            }
        }
        SubdomainScheme::Workspace {
            workspace, port, ..
        } => {
            if let Ok(value) = HeaderValue::from_str(workspace) {
                additional_request_headers.insert(WORKSPACE_HEADER, value);
            }
            additional_request_headers.insert(PORT_HEADER, HeaderValue::from(*port));
        }
    }

    tracing::debug!(
        host = %hostname,
        scheme = scheme.label(),
        target = %target_origin,
        "Resolved route"
    );

    RoutingDecision::Proxy(ProxyTarget {
        target_origin,
        backend_port: scheme.port(),
        scheme,
        public_domain: domain.to_string(),
        additional_request_headers,
        add_permissive_cors: permissive_cors,
        skip_service_worker,
        remove_meta_csp: skip_service_worker,
    })
}

/// Lowercase, drop any `:port` and trailing dot.
pub fn normalize_host(raw: &str) -> String {
    let host = raw.trim();
    let host = if host.starts_with('[') {
        // bracketed IPv6 literal
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        host.split(':').next().unwrap_or(host)
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// Split `hostname` into `(subdomain, public_domain)`.
fn split_public_host<'h>(
    hostname: &'h str,
    config: &'h RouterConfig,
) -> Option<(&'h str, &'h str)> {
    config.public_domains.iter().find_map(|domain| {
        let sub = hostname.strip_suffix(domain.as_str())?.strip_suffix('.')?;
        (!sub.is_empty()).then_some((sub, domain.as_str()))
    })
}

fn health_response() -> DirectResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    DirectResponse {
        status: StatusCode::OK,
        headers,
        body: Some(Bytes::from(
            serde_json::json!({ "status": "healthy" }).to_string(),
        )),
    }
}

fn service_worker_response() -> DirectResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/javascript"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    DirectResponse {
        status: StatusCode::OK,
        headers,
        body: Some(Bytes::from_static(SERVICE_WORKER_JS.as_bytes())),
    }
}
