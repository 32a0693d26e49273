//! # Sluice Core
//!
//! Core types and error handling for the Sluice gateway.
//!
//! This crate provides the foundations shared by every other crate:
//! - Error taxonomy and status mapping
//! - Replayable bodies backed by a process-wide buffer pool
//! - Typed builder arguments
//! - Pluggable clocks
//! - Name-to-builder registries

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod args;
pub mod body;
pub mod clock;
pub mod error;
pub mod pool;
pub mod registry;

pub use args::{Args, Spec};
pub use body::ReplayableBody;
pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use error::{BoxError, Error, ErrorKind, Result};
pub use pool::{BufferPool, PooledBuffer};
pub use registry::{Builder, Factory, Registry};

// Re-export commonly used HTTP types
pub use bytes::Bytes;
pub use http::{HeaderMap, Method, Request, Response, StatusCode};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::args::{Args, Spec};
    pub use crate::body::ReplayableBody;
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::registry::{Factory, Registry};
}
