//! # Sluice Proxy
//!
//! Backend HTTP client for the gateway:
//! - [`HttpClient`] capability trait used by the orchestrator
//! - Pooled hyper client over plain TCP or rustls
//! - Native root certificates plus optional custom CA
//! - Client certificates for mutual TLS

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod client;
pub mod connector;
pub mod tls;

pub use client::{ClientConfig, ClientTls, HttpClient, PooledClient};
pub use connector::{HttpsConnector, MaybeHttpsStream};
pub use tls::{build_client_tls, load_certificates, load_private_key};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{ClientConfig, HttpClient, PooledClient};
}
