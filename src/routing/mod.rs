//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, method, headers)
//!     → resolver.rs (apex / health / service worker / loop checks)
//!     → schemes.rs (port-, cmux-, workspace grammars, first match wins)
//!     → Return: RoutingDecision::Direct or RoutingDecision::Proxy
//! ```
//!
//! # Design Decisions
//! - Resolution is a pure function of the request and the config
//! - Each grammar is an independent parser, unit-tested in isolation
//! - Deterministic: same input always yields the same decision

pub mod decision;
pub mod resolver;
pub mod schemes;

pub use decision::{DirectResponse, ProxyTarget, RoutingDecision};
pub use resolver::{normalize_host, resolve, RouteRequest};
pub use schemes::{parse_subdomain, SubdomainError, SubdomainScheme};
