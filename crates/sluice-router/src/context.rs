//! Per-request gateway state
//!
//! [`GatewayContext`] travels through the filter chain and the backend call.
//! It owns the current request, the response once the backend has answered,
//! an attribute map for filters to talk to each other, a route-scoped logger
//! and the request's cancellation scope.

use crate::route::Route;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST};
use http::request::Parts;
use http::{HeaderMap, Method, Response, StatusCode};
use http_body::Body;
use sluice_core::{BoxError, Error, ReplayableBody, Result};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{Level, Span};
use url::Url;

/// Attribute holding the request URL as it was before any rewrite
pub const GATEWAY_ORIGINAL_REQUEST_URL: &str = "GATEWAY_ORIGINAL_REQUEST_URL";

/// Request as seen by filters and the backend call
#[derive(Debug)]
pub struct GatewayRequest {
    /// Absolute request URL
    pub url: Url,
    /// Request method
    pub method: Method,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: ReplayableBody,
    /// Declared body length (`None` for chunked or unknown)
    pub content_length: Option<u64>,
    /// Client address, when known
    pub remote_addr: Option<SocketAddr>,
}

impl GatewayRequest {
    /// Request with no headers and no body
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: ReplayableBody::empty(),
            content_length: Some(0),
            remote_addr: None,
        }
    }

    /// Build from an inbound request head and body
    pub fn from_parts<B>(parts: Parts, body: B, remote_addr: Option<SocketAddr>) -> Result<Self>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let url = absolute_url(&parts)?;
        let content_length = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .or_else(|| body.size_hint().exact());

        Ok(Self {
            url,
            method: parts.method,
            headers: parts.headers,
            body: ReplayableBody::new(body, content_length),
            content_length,
            remote_addr,
        })
    }

    /// Replace the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = ReplayableBody::from_bytes(body);
        self.content_length = self.body.len();
        self
    }

    /// Set the client address
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Request path
    pub fn path(&self) -> &str {
        self.url.path()
    }
}

fn absolute_url(parts: &Parts) -> Result<Url> {
    let scheme = parts.uri.scheme_str().unwrap_or("http");
    let authority = parts
        .uri
        .authority()
        .map(|a| a.as_str())
        .or_else(|| parts.headers.get(HOST).and_then(|v| v.to_str().ok()))
        .unwrap_or("localhost");
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Url::parse(&format!("{}://{}{}", scheme, authority, path_and_query))
        .map_err(|e| Error::InvalidRequest(format!("invalid request URL: {}", e)))
}

/// Backend response as seen by post-process filters
#[derive(Debug)]
pub struct GatewayResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: ReplayableBody,
}

impl GatewayResponse {
    /// Response with no headers and no body
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ReplayableBody::empty(),
        }
    }

    /// Wrap a backend response
    pub fn from_http(response: Response<ReplayableBody>) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }

    /// Replace the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = ReplayableBody::from_bytes(body);
        self
    }
}

/// Route-scoped logger
#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
    max_level: LevelFilter,
}

impl Logger {
    /// Logger over a span, capped at `max_level`
    pub fn new(span: Span, max_level: LevelFilter) -> Self {
        Self { span, max_level }
    }

    /// Span that request logs are recorded under
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Route-level cap
    pub fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    /// Whether `level` passes both the route cap and the global filter
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.max_level && level <= LevelFilter::current()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Span::current(), LevelFilter::TRACE)
    }
}

/// Cancellation and deadline of one request
#[derive(Debug, Clone)]
pub struct RequestScope {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestScope {
    /// Scope with a cancellation token and an optional deadline
    pub fn new(cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { cancel, deadline }
    }

    /// Run `fut`, failing with [`Error::Canceled`] on cancellation or
    /// [`Error::DeadlineExceeded`] once the deadline passes
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .unwrap_or(Err(Error::DeadlineExceeded)),
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Canceled),
            result = bounded => result,
        }
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// State of one request moving through the gateway
pub struct GatewayContext {
    /// Matched route
    pub route: Arc<Route>,
    /// Current request, mutable by pre-process filters
    pub request: GatewayRequest,
    /// Backend response, set once the backend has answered
    pub response: Option<GatewayResponse>,
    attributes: HashMap<String, Box<dyn Any + Send + Sync>>,
    logger: Logger,
    scope: RequestScope,
}

impl GatewayContext {
    /// Context for `request` on `route`, with the route timeout as deadline
    pub fn new(route: Arc<Route>, request: GatewayRequest) -> Self {
        Self::with_parent(route, request, &CancellationToken::new())
    }

    /// Context whose cancellation is a child of `parent`
    pub fn with_parent(route: Arc<Route>, request: GatewayRequest, parent: &CancellationToken) -> Self {
        let deadline = route.timeout.map(|t| Instant::now() + t);
        let logger = Logger::new(Span::current(), route.log_level.unwrap_or(LevelFilter::TRACE));
        Self {
            route,
            request,
            response: None,
            attributes: HashMap::new(),
            logger,
            scope: RequestScope::new(parent.child_token(), deadline),
        }
    }

    /// Replace the logger
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Override the deadline with `timeout` from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.scope.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Route-scoped logger
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Cancellation scope, detached from the borrow of the context
    pub fn scope(&self) -> RequestScope {
        self.scope.clone()
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.scope.deadline
    }

    /// Cancel the request
    pub fn cancel(&self) {
        self.scope.cancel.cancel();
    }

    /// Whether the request was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.scope.cancel.is_cancelled()
    }

    /// Run `fut` within the request's cancellation scope
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.scope.run(fut).await
    }

    /// Store an attribute
    pub fn set_attribute<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.attributes.insert(key.into(), Box::new(value));
    }

    /// Read an attribute of the given type
    pub fn attribute<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.attributes.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Remove an attribute
    pub fn remove_attribute(&mut self, key: &str) -> bool {
        self.attributes.remove(key).is_some()
    }

    /// Cancel outstanding work and give captured buffers back to the pool
    pub fn release(&mut self) {
        self.scope.cancel.cancel();
        self.attributes.clear();
        let _ = self.request.body.close();
        self.request.body = ReplayableBody::empty();
        if let Some(response) = self.response.as_mut() {
            let _ = response.body.close();
            response.body = ReplayableBody::empty();
        }
    }
}

impl fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayContext")
            .field("route", &self.route.id)
            .field("request", &self.request)
            .field("response", &self.response)
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .field("scope", &self.scope)
            .finish()
    }
}
