//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, dispatch)
//!     → routing::resolve (direct answer or proxy target)
//!     → request.rs (host extraction, forwarded header set)
//!     → transport.rs (HTTP forward + body rewrite)
//!       or websocket.rs (handshake + frame relay)
//!     → Send to client
//! ```

pub mod request;
pub mod server;
pub mod transport;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
