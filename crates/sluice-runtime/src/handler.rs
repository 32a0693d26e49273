//! HTTP entry point and error mapper

use crate::gateway::Gateway;
use crate::io::ReadTimeoutBody;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response};
use http_body::Body;
use sluice_core::{BoxError, Error, ErrorKind, ReplayableBody, Result};
use sluice_router::{GatewayContext, GatewayRequest, Logger, RoutingTable};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Request id header, stamped inbound when absent and echoed on the response
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Handler mounted at a fixed `METHOD /path`, ahead of the gateway
#[async_trait]
pub trait CustomHandler: Send + Sync + fmt::Debug {
    /// Answer the request
    async fn handle(&self, request: Request<ReplayableBody>) -> Result<Response<ReplayableBody>>;
}

/// Routes inbound requests through the gateway or a custom handler
#[derive(Clone)]
pub struct GatewayHandler {
    table: Arc<RoutingTable>,
    gateway: Gateway,
    custom: Arc<HashMap<String, Arc<dyn CustomHandler>>>,
    shutdown: CancellationToken,
    read_timeout: Option<Duration>,
}

impl fmt::Debug for GatewayHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayHandler")
            .field("routes", &self.table.len())
            .field("gateway", &self.gateway)
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl GatewayHandler {
    /// Create a handler over `table`
    pub fn new(table: RoutingTable, gateway: Gateway) -> Self {
        Self {
            table: Arc::new(table),
            gateway,
            custom: Arc::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            read_timeout: None,
        }
    }

    /// Parent token for every request context
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Time allowed to read a request body
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Mount `handler` at `pattern` (`"GET /health"`)
    pub fn custom_handler(mut self, pattern: &str, handler: Arc<dyn CustomHandler>) -> Result<Self> {
        let key = parse_pattern(pattern)?;
        Arc::make_mut(&mut self.custom).insert(key, handler);
        Ok(self)
    }

    /// Routing table
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Handle one inbound request. Never fails: errors become responses.
    pub async fn handle<B>(&self, mut req: Request<B>, remote_addr: Option<SocketAddr>) -> Response<ReplayableBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let request_id = match req.headers().get(&X_REQUEST_ID).and_then(|v| v.to_str().ok()) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                if let Ok(value) = HeaderValue::from_str(&id) {
                    req.headers_mut().insert(X_REQUEST_ID, value);
                }
                id
            }
        };

        let mut response = self.dispatch(req, remote_addr, &request_id).await;
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().entry(X_REQUEST_ID).or_insert(value);
        }
        response
    }

    async fn dispatch<B>(
        &self,
        req: Request<B>,
        remote_addr: Option<SocketAddr>,
        request_id: &str,
    ) -> Response<ReplayableBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let body = ReadTimeoutBody::new(body, self.read_timeout);

        let key = format!("{} {}", parts.method, parts.uri.path());
        if let Some(custom) = self.custom.get(&key) {
            let request = Request::from_parts(parts, ReplayableBody::new(body, None));
            return match custom.handle(request).await {
                Ok(response) => response,
                Err(err) => map_error(&err),
            };
        }

        let Some(route) = self.table.find_matching(&parts).cloned() else {
            let err = Error::RouteNotFound(format!("{} {}", parts.method, parts.uri.path()));
            return map_error(&err);
        };

        let request = match GatewayRequest::from_parts(parts, body, remote_addr) {
            Ok(request) => request,
            Err(err) => return map_error(&err),
        };

        let span = info_span!(
            "gateway",
            route = %route.id,
            request_id = %request_id,
            method = %request.method,
            path = %request.url.path(),
        );
        let level = route.log_level.unwrap_or(LevelFilter::TRACE);
        let mut ctx = GatewayContext::with_parent(route, request, &self.shutdown)
            .with_logger(Logger::new(span.clone(), level));

        let started = Instant::now();
        let result = self.gateway.handle(&mut ctx).instrument(span.clone()).await;

        let response = match result.and_then(|()| take_response(&mut ctx)) {
            Ok(response) => {
                span.in_scope(|| {
                    info!(
                        status = response.status().as_u16(),
                        latency_ms = started.elapsed().as_millis() as u64,
                        "Request completed"
                    )
                });
                response
            }
            Err(err) => span.in_scope(|| map_error(&err)),
        };
        ctx.release();
        response
    }
}

fn take_response(ctx: &mut GatewayContext) -> Result<Response<ReplayableBody>> {
    let upstream = ctx
        .response
        .as_mut()
        .ok_or_else(|| Error::Internal("gateway finished without a response".to_string()))?;

    let mut response = Response::new(upstream.body.forward());
    *response.status_mut() = upstream.status;
    *response.headers_mut() = std::mem::take(&mut upstream.headers);
    Ok(response)
}

fn parse_pattern(pattern: &str) -> Result<String> {
    let (method, path) = pattern
        .trim()
        .split_once(' ')
        .ok_or_else(|| Error::Config(format!("handler pattern '{pattern}' must be 'METHOD /path'")))?;

    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| Error::Config(format!("invalid method in handler pattern '{pattern}'")))?;
    let path = path.trim();
    if !path.starts_with('/') {
        return Err(Error::Config(format!(
            "handler pattern '{pattern}' must have an absolute path"
        )));
    }
    Ok(format!("{method} {path}"))
}

/// Turn a gateway error into a plain-text response, logging it by kind
pub fn map_error(err: &Error) -> Response<ReplayableBody> {
    let kind = err.kind();
    let message = match kind {
        ErrorKind::RouteNotFound => "route not found",
        ErrorKind::DeadlineExceeded => "request timeout",
        ErrorKind::Http => "backend request failed",
        ErrorKind::RateLimitExceeded => "rate limit exceeded",
        ErrorKind::CircuitBreaker => "circuit breaker rejected request",
        ErrorKind::Unexpected => "unexpected error",
    };

    if kind == ErrorKind::RouteNotFound {
        info!(error = %err, "{message}");
    } else {
        error!(error = %err, kind = %kind, "{message}");
    }

    let mut response = Response::new(ReplayableBody::from_bytes(message));
    *response.status_mut() = err.to_status_code();
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use http_body_util::{BodyExt, Empty, Full};
    use sluice_proxy::HttpClient;
    use sluice_router::{FilterChain, Route};

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl HttpClient for Echo {
        async fn send(&self, request: Request<ReplayableBody>) -> Result<Response<ReplayableBody>> {
            let (parts, mut body) = request.into_parts();
            let mut payload = parts.uri.to_string().into_bytes();
            payload.extend_from_slice(&body.read_to_bytes().await?);

            let mut response = Response::new(ReplayableBody::from_bytes(payload));
            response
                .headers_mut()
                .insert("x-backend", HeaderValue::from_static("echo"));
            Ok(response)
        }
    }

    #[derive(Debug)]
    struct Health;

    #[async_trait]
    impl CustomHandler for Health {
        async fn handle(&self, _request: Request<ReplayableBody>) -> Result<Response<ReplayableBody>> {
            Ok(Response::new(ReplayableBody::from_bytes("healthy")))
        }
    }

    fn handler() -> GatewayHandler {
        let route = Route::builder("echo", "http://backend:9000/").build().unwrap();
        GatewayHandler::new(
            RoutingTable::new(vec![route]),
            Gateway::new(Arc::new(Echo), FilterChain::default()),
        )
    }

    async fn body_text(response: Response<ReplayableBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_forwards_and_stamps_request_id() {
        let req = Request::post("http://gw.local/items?page=2")
            .body(Full::new(Bytes::from("payload")))
            .unwrap();

        let response = handler().handle(req, None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-backend"], "echo");
        assert!(response.headers().contains_key(&X_REQUEST_ID));
        assert_eq!(
            body_text(response).await,
            "http://backend:9000/items?page=2payload"
        );
    }

    #[tokio::test]
    async fn test_keeps_inbound_request_id() {
        let req = Request::get("http://gw.local/")
            .header(&X_REQUEST_ID, "abc-123")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let response = handler().handle(req, None).await;
        assert_eq!(response.headers()[&X_REQUEST_ID], "abc-123");
    }

    #[tokio::test]
    async fn test_no_route_is_not_found() {
        let handler = GatewayHandler::new(
            RoutingTable::new(Vec::new()),
            Gateway::new(Arc::new(Echo), FilterChain::default()),
        );
        let req = Request::get("http://gw.local/missing")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let response = handler.handle(req, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "route not found");
    }

    #[tokio::test]
    async fn test_custom_handler_takes_precedence() {
        let handler = handler().custom_handler("get /health", Arc::new(Health)).unwrap();

        let req = Request::get("http://gw.local/health")
            .body(Empty::<Bytes>::new())
            .unwrap();
        let response = handler.handle(req, None).await;
        assert_eq!(body_text(response).await, "healthy");

        let req = Request::post("http://gw.local/health")
            .body(Empty::<Bytes>::new())
            .unwrap();
        let response = handler.handle(req, None).await;
        assert!(body_text(response).await.starts_with("http://backend:9000/health"));
    }

    #[test]
    fn test_invalid_handler_pattern() {
        assert!(parse_pattern("/health").is_err());
        assert!(parse_pattern("GET health").is_err());
        assert_eq!(parse_pattern(" post /hooks ").unwrap(), "POST /hooks");
    }

    #[test]
    fn test_map_error_statuses() {
        let cases = [
            (Error::RouteNotFound("/x".into()), StatusCode::NOT_FOUND),
            (Error::route("r", Error::DeadlineExceeded), StatusCode::BAD_GATEWAY),
            (Error::Upstream("refused".into()), StatusCode::BAD_GATEWAY),
            (
                Error::route("r", Error::pre_filter("RateLimit", Error::RateLimitExceeded { remaining: 0 })),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (Error::CircuitOpen("cb".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::Internal("?".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(map_error(&err).status(), status, "{err}");
        }
    }
}
