//! # Sluice Filters
//!
//! Built-in gateway filters and rate limiting:
//! - Request and response header add/set/remove
//! - Regex path rewriting that remembers the original URL
//! - Request/response logging with body capture and header redaction
//! - Token-bucket rate limiting keyed by client IP, path, header or query
//! - Builder registries for filters, limiters and key functions

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod header;
pub mod keyfunc;
pub mod limiter;
pub mod logger;
pub mod rate_limit;
pub mod registry;
pub mod rewrite;

pub use header::{HeaderFilter, HeaderOp, HeaderTarget};
pub use keyfunc::{HeaderKey, IpKey, KeyFunction, PathKey, PathMethodKey, QueryKey};
pub use limiter::{Decision, InMemoryLimiter, RateLimiter, TokenBucket};
pub use logger::RequestResponseLogger;
pub use rate_limit::RateLimitFilter;
pub use registry::{
    default_filter_factory, default_filter_registry, default_key_function_registry,
    default_limiter_registry, FilterFactory, FilterRegistry, KeyFunctionFactory,
    KeyFunctionRegistry, LimiterFactory, LimiterRegistry,
};
pub use rewrite::RewritePath;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::keyfunc::KeyFunction;
    pub use crate::limiter::RateLimiter;
    pub use crate::registry::{default_filter_factory, FilterFactory};
}
