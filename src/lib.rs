//! Multi-tenant edge proxy for sandbox previews.
//!
//! Maps public hostnames such as `port-5173-abc123.cmux.sh` onto sandbox
//! origins, rewrites HTML and JavaScript so in-page `localhost:<port>`
//! navigations keep working, and relays WebSockets.

// Core subsystems
pub mod config;
pub mod http;
pub mod rewrite;
pub mod routing;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
