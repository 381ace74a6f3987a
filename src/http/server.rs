//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Bind server to listener, shut down on broadcast
//! - Dispatch requests to the resolver, then to HTTP or WebSocket transport
//! - Observability (metrics, correlation IDs)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::request::{is_websocket_upgrade, request_host, X_REQUEST_ID};
use crate::http::transport::forward_http;
use crate::http::websocket::forward_websocket;
use crate::observability::metrics;
use crate::routing::{normalize_host, resolve, RouteRequest, RoutingDecision};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Result<Self, reqwest::Error> {
        // Redirects are returned to the browser, never followed here.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .no_proxy()
            .build()?;
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    config: Arc<ProxyConfig>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, reqwest::Error> {
        let state = AppState::new(config)?;
        let config = state.config.clone();
        let router = Self::build_router(&config, state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.limits.max_request_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            public_domains = ?self.config.routing.public_domains,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
/// Resolves the host to a decision, then answers or forwards.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let (parts, body) = request.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let raw_host = request_host(&parts).unwrap_or_default();
    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let decision = resolve(
        &RouteRequest {
            method: &parts.method,
            hostname: &raw_host,
            pathname: parts.uri.path(),
            search: parts.uri.query(),
            headers: &parts.headers,
        },
        &state.config.routing,
    );

    let target = match decision {
        RoutingDecision::Direct(direct) => {
            metrics::record_request(method.as_str(), direct.status.as_u16(), "direct", start_time);
            return direct.into_response();
        }
        RoutingDecision::Proxy(target) => target,
    };

    let route = target.route_label();
    let host = normalize_host(&raw_host);

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        host = %host,
        path = %path,
        route,
        "Proxying request"
    );

    let result = match ws {
        Ok(upgrade) => {
            forward_websocket(&state, &target, upgrade, &parts, client_addr, &host).await
        }
        Err(rejection) if is_websocket_upgrade(&parts.headers) => {
            tracing::warn!(
                request_id = %request_id,
                host = %host,
                reason = %rejection,
                "Rejected malformed WebSocket upgrade"
            );
            let status = rejection.status().as_u16();
            metrics::record_request(method.as_str(), status, route, start_time);
            return rejection.into_response();
        }
        Err(_) => forward_http(&state, &target, parts, body, client_addr, &host).await,
    };

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            match &err {
                ProxyError::Upstream { .. } => tracing::error!(
                    request_id = %request_id,
                    method = %method,
                    host = %host,
                    path = %path,
                    target = %target.target_origin,
                    error = %err,
                    "Upstream request failed"
                ),
                _ => tracing::error!(
                    request_id = %request_id,
                    method = %method,
                    host = %host,
                    path = %path,
                    target = %target.target_origin,
                    error = %err,
                    "Failed to rewrite response"
                ),
            }
            err.into_response()
        }
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), route, start_time);
    response
}
