//! Response body rewriting.
//!
//! # Data Flow
//! ```text
//! Upstream response (content-type, request path)
//!     → classify() picks Html, JavaScript or Passthrough
//!     → html.rs (inject shim, drop meta CSP, rewrite inline scripts)
//!     → javascript.rs (location virtualization, external bootstrap)
//!     → Rewritten bytes, or the original stream untouched
//! ```
//!
//! # Design Decisions
//! - Only HTML and JavaScript are buffered; everything else streams through
//! - A failed rewrite is an error, never a fallback to the original body

pub mod assets;
pub mod html;
pub mod javascript;

use thiserror::Error;

pub use html::{rewrite_html, HtmlRewriteOptions};
pub use javascript::rewrite_javascript;

/// Why a response body could not be rewritten.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("HTML rewrite failed: {0}")]
    Html(#[from] lol_html::errors::RewritingError),

    #[error("JavaScript body is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("body exceeds rewrite limit of {limit} bytes")]
    TooLarge { limit: usize },
}

/// How a response body is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Html,
    JavaScript,
    Passthrough,
}

impl BodyKind {
    pub fn needs_rewrite(self) -> bool {
        self != BodyKind::Passthrough
    }
}

/// Choose the rewrite path from the response content type and request path.
pub fn classify(content_type: Option<&str>, path: &str) -> BodyKind {
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    if content_type.contains("text/html") {
        BodyKind::Html
    } else if content_type.contains("javascript") || path.ends_with(".js") {
        BodyKind::JavaScript
    } else {
        BodyKind::Passthrough
    }
}

/// Rewrite a fully buffered body. Passthrough bodies are returned as-is.
pub fn rewrite_body(
    kind: BodyKind,
    body: &[u8],
    options: HtmlRewriteOptions,
) -> Result<Vec<u8>, RewriteError> {
    match kind {
        BodyKind::Html => rewrite_html(body, options),
        BodyKind::JavaScript => {
            let source = std::str::from_utf8(body)?;
            Ok(rewrite_javascript(source, true).into_bytes())
        }
        BodyKind::Passthrough => Ok(body.to_vec()),
    }
}
