//! Error types for the proxy.
//!
//! Every error is converted into a direct HTTP response where it is detected;
//! nothing propagates past a single request.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::rewrite::RewriteError;
use crate::routing::SubdomainError;

/// Errors surfaced to clients while serving a request.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("{0}")]
    Client(#[from] SubdomainError),

    #[error("Not found")]
    NotFound,

    #[error("Loop detected in proxy")]
    Loop,

    #[error("Upstream request to {target} failed: {reason}")]
    Upstream { target: String, reason: String },

    #[error("Rewrite failed: {0}")]
    Rewrite(#[from] RewriteError),
}

impl ProxyError {
    pub fn upstream(target: impl Into<String>, reason: impl ToString) -> Self {
        ProxyError::Upstream {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Client(_) => StatusCode::BAD_REQUEST,
            ProxyError::NotFound => StatusCode::NOT_FOUND,
            ProxyError::Loop => StatusCode::LOOP_DETECTED,
            ProxyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Rewrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body sent to the client. Upstream and rewrite details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ProxyError::Upstream { .. } => "Upstream request failed".to_string(),
            ProxyError::Rewrite(_) => "Failed to rewrite response".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.public_message()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ProxyError::Client(SubdomainError::CmuxPort).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ProxyError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ProxyError::Loop.status(), StatusCode::LOOP_DETECTED);
        assert_eq!(
            ProxyError::upstream("https://x", "refused").status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Rewrite(RewriteError::TooLarge { limit: 1 }).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn public_messages_hide_internals() {
        assert_eq!(
            ProxyError::upstream("https://secret.internal", "connection refused").public_message(),
            "Upstream request failed"
        );
        assert_eq!(
            ProxyError::Rewrite(RewriteError::TooLarge { limit: 8 }).public_message(),
            "Failed to rewrite response"
        );
        assert_eq!(
            ProxyError::Client(SubdomainError::WorkspaceShape).public_message(),
            "Invalid cmux subdomain"
        );
        assert_eq!(ProxyError::Loop.public_message(), "Loop detected in proxy");
    }
}
