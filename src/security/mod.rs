//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → loop_guard.rs (reject requests that already passed through us)
//!     → Pass to routing
//!
//! Upstream response:
//!     → headers.rs (CSP stripping, CORS, redirect rewriting, hop-by-hop)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - Header stages are pure functions over owned header maps
//! - Fail closed: a request carrying the sentinel is never forwarded

pub mod headers;
pub mod loop_guard;
