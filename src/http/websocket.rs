//! WebSocket proxy handling.
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Backend
//! ```
//!
//! # Design Decisions
//! - The upstream handshake completes before the client is upgraded, so a
//!   dead backend is a 502 rather than a dropped socket
//! - Frame-level forwarding (no message buffering)
//! - Either side finishing tears down the other direction

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{
    CloseFrame as ClientCloseFrame, Message as ClientMessage, WebSocket, WebSocketUpgrade,
};
use axum::http::header;
use axum::http::request::Parts;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::error::ProxyError;
use crate::http::request::forward_websocket_headers;
use crate::http::server::AppState;
use crate::http::transport::upstream_url;
use crate::observability::metrics;
use crate::routing::ProxyTarget;

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dial the backend, then upgrade the client and relay frames.
pub async fn forward_websocket(
    state: &AppState,
    target: &ProxyTarget,
    upgrade: WebSocketUpgrade,
    parts: &Parts,
    client_addr: SocketAddr,
    public_host: &str,
) -> Result<Response, ProxyError> {
    let url = upstream_url(target, &state.config.upstream, &parts.uri, true)?;
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ProxyError::upstream(url.as_str(), e))?;
    request.headers_mut().extend(forward_websocket_headers(
        &parts.headers,
        &target.additional_request_headers,
        client_addr,
        public_host,
    ));

    let handshake_timeout = Duration::from_secs(state.config.timeouts.upstream_secs);
    let (upstream, handshake) =
        match tokio::time::timeout(handshake_timeout, tokio_tungstenite::connect_async(request))
            .await
        {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return Err(ProxyError::upstream(url.as_str(), e)),
            Err(_) => return Err(ProxyError::upstream(url.as_str(), "handshake timed out")),
        };

    let protocol = handshake
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let upgrade = match protocol {
        Some(protocol) => upgrade.protocols([protocol]),
        None => upgrade,
    };

    let session_id = Uuid::new_v4();
    let route = target.route_label();
    tracing::info!(
        session_id = %session_id,
        route,
        target_url = %url,
        "WebSocket session established"
    );

    Ok(upgrade.on_upgrade(move |socket| relay(socket, upstream, route, session_id)))
}

async fn relay(client: WebSocket, upstream: UpstreamSocket, route: &'static str, session_id: Uuid) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let mut client_to_upstream = tokio::spawn(async move {
        while let Some(Ok(message)) = client_rx.next().await {
            let closing = matches!(message, ClientMessage::Close(_));
            if upstream_tx.send(into_upstream(message)).await.is_err() || closing {
                break;
            }
        }
        let _ = upstream_tx.close().await;
    });

    let mut upstream_to_client = tokio::spawn(async move {
        while let Some(Ok(message)) = upstream_rx.next().await {
            let Some(message) = into_client(message) else {
                continue;
            };
            let closing = matches!(message, ClientMessage::Close(_));
            if client_tx.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = client_tx.close().await;
    });

    let outcome = tokio::select! {
        _ = &mut client_to_upstream => {
            upstream_to_client.abort();
            "client_closed"
        }
        _ = &mut upstream_to_client => {
            client_to_upstream.abort();
            "upstream_closed"
        }
    };

    metrics::record_websocket(route, outcome);
    tracing::info!(session_id = %session_id, route, outcome, "WebSocket session closed");
}

fn into_upstream(message: ClientMessage) -> Message {
    match message {
        ClientMessage::Text(text) => Message::Text(text.as_str().to_owned().into()),
        ClientMessage::Binary(data) => Message::Binary(data),
        ClientMessage::Ping(data) => Message::Ping(data),
        ClientMessage::Pong(data) => Message::Pong(data),
        ClientMessage::Close(frame) => Message::Close(frame.map(|frame| CloseFrame {
            code: CloseCode::from(frame.code),
            reason: frame.reason.as_str().to_owned().into(),
        })),
    }
}

/// Raw frames never surface from a read; they are dropped.
fn into_client(message: Message) -> Option<ClientMessage> {
    Some(match message {
        Message::Text(text) => ClientMessage::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => ClientMessage::Binary(data),
        Message::Ping(data) => ClientMessage::Ping(data),
        Message::Pong(data) => ClientMessage::Pong(data),
        Message::Close(frame) => ClientMessage::Close(frame.map(|frame| ClientCloseFrame {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().to_owned().into(),
        })),
        Message::Frame(_) => return None,
    })
}
