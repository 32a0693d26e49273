//! # Sluice Health
//!
//! Backend health protection with:
//! - Closed / Open / Half-Open circuit breaker
//! - Generation counter that discards late completions
//! - Pluggable trip and success policies
//! - Panic and cancellation accounting

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod circuit_breaker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, Counts,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::circuit_breaker::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, Counts,
    };
}
