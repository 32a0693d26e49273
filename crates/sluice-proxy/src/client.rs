//! HTTP client for backend requests

use crate::connector::HttpsConnector;
use crate::tls::build_client_tls;
use async_trait::async_trait;
use http::{Request, Response};
use http_body::Body as _;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use sluice_core::{Error, ReplayableBody, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Sends a fully formed request to a backend
#[async_trait]
pub trait HttpClient: Send + Sync + fmt::Debug {
    /// Send `req` (absolute URI) and return the backend response
    async fn send(&self, req: Request<ReplayableBody>) -> Result<Response<ReplayableBody>>;
}

/// PEM files for backend TLS
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientTls {
    /// Extra CA bundle trusted alongside the platform roots
    pub ca_file: Option<PathBuf>,
    /// Client certificate chain for mutual TLS
    pub cert_file: Option<PathBuf>,
    /// Client private key for mutual TLS
    pub key_file: Option<PathBuf>,
}

/// Backend client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// How long an idle pooled connection is kept
    pub pool_idle_timeout: Duration,
    /// Idle connections kept per backend host
    pub pool_max_idle_per_host: usize,
    /// Skip backend certificate verification
    pub insecure_skip_verify: bool,
    /// Custom CA and client identity
    pub tls: Option<ClientTls>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
            insecure_skip_verify: false,
            tls: None,
        }
    }
}

impl ClientConfig {
    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable certificate verification bypass
    pub fn insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    /// Set custom TLS material
    pub fn tls(mut self, tls: ClientTls) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// Pooled hyper client over plain TCP or rustls
#[derive(Clone)]
pub struct PooledClient {
    client: Client<HttpsConnector, ReplayableBody>,
    config: Arc<ClientConfig>,
}

impl PooledClient {
    /// Create a client; fails when the TLS material cannot be loaded
    pub fn new(config: ClientConfig) -> Result<Self> {
        let tls = build_client_tls(&config)?;

        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(config.connect_timeout));
        http.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build(HttpsConnector::new(http, Arc::new(tls)));

        tracing::debug!(
            connect_timeout = ?config.connect_timeout,
            pool_idle_timeout = ?config.pool_idle_timeout,
            pool_max_idle_per_host = config.pool_max_idle_per_host,
            "Backend client created"
        );

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledClient")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl HttpClient for PooledClient {
    async fn send(&self, req: Request<ReplayableBody>) -> Result<Response<ReplayableBody>> {
        let uri = req.uri().clone();
        let response = self.client.request(req).await.map_err(|e| {
            tracing::debug!(uri = %uri, error = %e, "Backend request failed");
            Error::Upstream(e.to_string())
        })?;

        let (parts, body) = response.into_parts();
        let len = body.size_hint().exact();
        Ok(Response::from_parts(parts, ReplayableBody::new(body, len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.pool_idle_timeout, Duration::from_secs(90));
        assert_eq!(config.pool_max_idle_per_host, 32);
        assert!(!config.insecure_skip_verify);
    }

    #[tokio::test]
    async fn test_send_to_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(header("x-trace", "t1"))
            .respond_with(ResponseTemplate::new(201).set_body_string("stored"))
            .mount(&server)
            .await;

        let client = PooledClient::new(ClientConfig::default().insecure_skip_verify(true)).unwrap();
        let req = Request::post(format!("{}/echo", server.uri()))
            .header("x-trace", "t1")
            .body(ReplayableBody::from_bytes("payload"))
            .unwrap();

        let mut response = client.send(req).await.unwrap();
        assert_eq!(response.status(), 201);
        let body = response.body_mut().read_to_bytes().await.unwrap();
        assert_eq!(&body[..], b"stored");
    }

    #[tokio::test]
    async fn test_connection_refused_is_upstream_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = PooledClient::new(
            ClientConfig::default()
                .insecure_skip_verify(true)
                .connect_timeout(Duration::from_millis(500)),
        )
        .unwrap();
        let req = Request::get(format!("http://{}/", addr))
            .body(ReplayableBody::empty())
            .unwrap();

        let err = client.send(req).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }
}
