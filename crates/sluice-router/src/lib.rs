//! # Sluice Router
//!
//! Predicate-based routing with support for:
//! - Path globs (`/v1/**`, `/files/*.json`) and host patterns (`*.example.com`)
//! - Method, header, query, cookie and calendar predicates
//! - Ordered filter chains with reverse-order post-processing
//! - Per-request gateway context with attributes, logger and deadline
//! - First-match routing tables

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod context;
pub mod filter;
pub mod matcher;
pub mod predicate;
pub mod registry;
pub mod route;
pub mod table;

pub use context::{
    GatewayContext, GatewayRequest, GatewayResponse, Logger, RequestScope,
    GATEWAY_ORIGINAL_REQUEST_URL,
};
pub use filter::{Filter, FilterChain};
pub use matcher::{convert_pattern_to_regex, path_matches, HostMatcher, PathMatcher};
pub use predicate::{test_all, Predicate};
pub use registry::{default_predicate_registry, PredicateFactory, PredicateRegistry};
pub use route::{Route, RouteBuilder};
pub use table::RoutingTable;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::context::{GatewayContext, GatewayRequest, GatewayResponse};
    pub use crate::filter::{Filter, FilterChain};
    pub use crate::predicate::Predicate;
    pub use crate::route::{Route, RouteBuilder};
    pub use crate::table::RoutingTable;
}
