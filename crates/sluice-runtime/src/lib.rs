//! # Sluice Runtime
//!
//! Request lifecycle for the Sluice gateway:
//! - Gateway orchestrator (pre-filters, backend call, post-filters)
//! - HTTP handler with custom handler mounts and error mapping
//! - Route and filter assembly from configuration
//! - HTTP/1.1 server with idle, write and header timeouts
//! - Graceful shutdown on SIGINT/SIGTERM

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod app;
pub mod assemble;
pub mod gateway;
pub mod handler;
pub mod io;
pub mod server;
pub mod shutdown;

pub use app::Application;
pub use assemble::{
    assemble, build_global_filters, build_route, build_routing_table, client_config, Registries,
};
pub use gateway::Gateway;
pub use handler::{map_error, CustomHandler, GatewayHandler, X_REQUEST_ID};
pub use io::{ActiveGuard, ActiveRequests, ReadTimeoutBody, TimeoutIo, TrackedBody};
pub use server::Server;
pub use shutdown::{ShutdownSignal, SignalHandler};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::app::Application;
    pub use crate::gateway::Gateway;
    pub use crate::handler::{CustomHandler, GatewayHandler};
    pub use crate::server::Server;
    pub use crate::shutdown::ShutdownSignal;
}
