//! Gateway orchestrator

use http::header::{
    CONNECTION, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING,
    UPGRADE,
};
use http::{HeaderMap, HeaderName, Request, Response};
use sluice_core::{Error, ReplayableBody, Result};
use sluice_proxy::HttpClient;
use sluice_router::{FilterChain, GatewayContext, GatewayResponse};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Headers scoped to a single connection, never forwarded
const HOP_BY_HOP: [HeaderName; 9] = [
    CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

/// Remove hop-by-hop headers, including those listed in `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Runs one request through filters and the backend
#[derive(Clone)]
pub struct Gateway {
    client: Arc<dyn HttpClient>,
    global_filters: FilterChain,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("client", &self.client)
            .field("global_filters", &self.global_filters.names())
            .finish()
    }
}

impl Gateway {
    /// Create a gateway over `client`; `global_filters` wrap every route's filters
    pub fn new(client: Arc<dyn HttpClient>, global_filters: FilterChain) -> Self {
        Self {
            client,
            global_filters,
        }
    }

    /// Filters applied to every route
    pub fn global_filters(&self) -> &FilterChain {
        &self.global_filters
    }

    /// Pre-process, call the backend, then post-process.
    ///
    /// Post-process filters only run when the backend answered. On success
    /// `ctx.response` holds the response to send. Every error is annotated
    /// with the route id.
    pub async fn handle(&self, ctx: &mut GatewayContext) -> Result<()> {
        let route = Arc::clone(&ctx.route);
        let filters = route.combine_global_filters(&self.global_filters);

        filters
            .pre_process_all(ctx)
            .await
            .map_err(|e| Error::route(&route.id, e))?;

        let request = self.proxy_request(ctx).map_err(|e| Error::route(&route.id, e))?;
        let destination = request.uri().clone();

        let started = Instant::now();
        let scope = ctx.scope();
        let send = scope.run(self.client.send(request));
        let result = match &route.circuit_breaker {
            Some(breaker) => {
                breaker
                    .execute_with(send, |response: &Response<ReplayableBody>| {
                        let status = response.status();
                        status.is_server_error().then(|| Error::UpstreamStatus(status))
                    })
                    .await
            }
            None => send.await,
        };

        let response = result.map_err(|e| Error::route(&route.id, backend_error(e)))?;
        debug!(
            route = %route.id,
            destination = %destination,
            status = response.status().as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Backend responded"
        );
        let mut response = GatewayResponse::from_http(response);
        strip_hop_by_hop(&mut response.headers);
        ctx.response = Some(response);

        filters
            .post_process_all(ctx)
            .await
            .map_err(|e| Error::route(&route.id, e))
    }

    fn proxy_request(&self, ctx: &mut GatewayContext) -> Result<Request<ReplayableBody>> {
        let url = ctx.route.destination_url(&ctx.request.url);

        let mut headers = ctx.request.headers.clone();
        headers.remove(HOST);
        strip_hop_by_hop(&mut headers);

        let mut request = Request::builder()
            .method(ctx.request.method.clone())
            .uri(url.as_str())
            .body(ctx.request.body.forward())?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

fn backend_error(err: Error) -> Error {
    match err {
        Error::DeadlineExceeded
        | Error::Canceled
        | Error::CircuitOpen(_)
        | Error::HalfOpenRequestExceeded(_)
        | Error::Upstream(_) => err,
        other => Error::Upstream(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::StatusCode;
    use mockall::mock;
    use parking_lot::Mutex;
    use sluice_core::{system_clock, Args, ErrorKind};
    use sluice_filters::default_filter_factory;
    use sluice_health::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    use sluice_router::{Filter, GatewayRequest, Route, GATEWAY_ORIGINAL_REQUEST_URL};
    use std::time::Duration;
    use url::Url;

    mock! {
        Client {}

        #[async_trait]
        impl HttpClient for Client {
            async fn send(&self, request: Request<ReplayableBody>) -> Result<Response<ReplayableBody>>;
        }
    }

    impl std::fmt::Debug for MockClient {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockClient").finish()
        }
    }

    fn respond(status: u16, body: &'static str) -> Result<Response<ReplayableBody>> {
        Ok(Response::builder()
            .status(status)
            .body(ReplayableBody::from_bytes(body))
            .unwrap())
    }

    fn context(route: Route, method: http::Method, url: &str) -> GatewayContext {
        let request = GatewayRequest::new(method, Url::parse(url).unwrap());
        GatewayContext::new(Arc::new(route), request)
    }

    #[derive(Debug)]
    struct SlowClient(Duration);

    #[async_trait]
    impl HttpClient for SlowClient {
        async fn send(&self, _request: Request<ReplayableBody>) -> Result<Response<ReplayableBody>> {
            tokio::time::sleep(self.0).await;
            respond(200, "late")
        }
    }

    #[derive(Debug)]
    struct Recording {
        name: &'static str,
        fail_post: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Filter for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn pre_process(&self, _ctx: &mut GatewayContext) -> Result<()> {
            self.log.lock().push(format!("{}.pre", self.name));
            Ok(())
        }

        async fn post_process(&self, _ctx: &mut GatewayContext) -> Result<()> {
            self.log.lock().push(format!("{}.post", self.name));
            if self.fail_post {
                return Err(Error::Internal(format!("{} refused", self.name)));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pass_through() {
        let mut client = MockClient::new();
        client
            .expect_send()
            .withf(|req| req.uri().to_string() == "http://b/x?a=1" && req.method() == http::Method::GET)
            .times(1)
            .returning(|_| respond(200, "ok"));

        let route = Route::builder("r", "http://b/").build().unwrap();
        let mut ctx = context(route, http::Method::GET, "http://gw.local/x?a=1");

        let gateway = Gateway::new(Arc::new(client), FilterChain::default());
        gateway.handle(&mut ctx).await.unwrap();

        let response = ctx.response.as_mut().unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body.read_to_bytes().await.unwrap()[..], b"ok");
    }

    #[tokio::test]
    async fn test_rewrite_and_header_reach_backend() {
        let filters = default_filter_factory(system_clock()).unwrap();
        let rewrite = filters
            .build(
                "RewritePath",
                &Args::new().with("regexp", "^/v1/(.*)$").with("replacement", "/$1"),
            )
            .unwrap();
        let header = filters
            .build("AddRequestHeader", &Args::new().with("name", "X-Trace").with("value", "t1"))
            .unwrap();

        let mut client = MockClient::new();
        client
            .expect_send()
            .withf(|req| {
                req.uri().path() == "/foo"
                    && req.headers().get("x-trace").map(|v| v.as_bytes()) == Some(&b"t1"[..])
                    && !req.headers().contains_key(HOST)
            })
            .times(1)
            .returning(|_| respond(200, ""));

        let route = Route::builder("v1", "http://b/")
            .filter(rewrite)
            .filter(header)
            .build()
            .unwrap();
        let mut ctx = context(route, http::Method::GET, "http://gw.local/v1/foo");
        ctx.request
            .headers
            .insert(HOST, http::HeaderValue::from_static("gw.local"));

        let gateway = Gateway::new(Arc::new(client), FilterChain::default());
        gateway.handle(&mut ctx).await.unwrap();

        let original = ctx.attribute::<Url>(GATEWAY_ORIGINAL_REQUEST_URL).unwrap();
        assert_eq!(original.path(), "/v1/foo");
        assert_eq!(ctx.request.url.path(), "/foo");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, http::HeaderValue::from_static("keep-alive, X-Session"));
        headers.insert("keep-alive", http::HeaderValue::from_static("timeout=5"));
        headers.insert("x-session", http::HeaderValue::from_static("abc"));
        headers.insert(TRANSFER_ENCODING, http::HeaderValue::from_static("chunked"));
        headers.insert(PROXY_AUTHORIZATION, http::HeaderValue::from_static("Basic xyz"));
        headers.insert("x-trace", http::HeaderValue::from_static("t1"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("x-trace"));
    }

    #[tokio::test]
    async fn test_hop_by_hop_headers_stripped_both_ways() {
        let mut client = MockClient::new();
        client
            .expect_send()
            .withf(|req| {
                !req.headers().contains_key(CONNECTION)
                    && !req.headers().contains_key(UPGRADE)
                    && !req.headers().contains_key(TE)
                    && req.headers().contains_key("x-trace")
            })
            .times(1)
            .returning(|_| {
                Ok(Response::builder()
                    .header(CONNECTION, "close")
                    .header(TRANSFER_ENCODING, "chunked")
                    .header("x-backend", "b1")
                    .body(ReplayableBody::from_bytes("ok"))
                    .unwrap())
            });

        let route = Route::builder("r", "http://b/").build().unwrap();
        let mut ctx = context(route, http::Method::GET, "http://gw.local/x");
        let inbound = [
            ("connection", "upgrade"),
            ("upgrade", "websocket"),
            ("te", "trailers"),
            ("x-trace", "t1"),
        ];
        for (name, value) in inbound {
            ctx.request
                .headers
                .insert(name, http::HeaderValue::from_static(value));
        }

        let gateway = Gateway::new(Arc::new(client), FilterChain::default());
        gateway.handle(&mut ctx).await.unwrap();

        let response = ctx.response.as_ref().unwrap();
        assert!(!response.headers.contains_key(CONNECTION));
        assert!(!response.headers.contains_key(TRANSFER_ENCODING));
        assert_eq!(response.headers.get("x-backend").unwrap(), "b1");
    }

    #[tokio::test]
    async fn test_route_timeout_is_deadline_exceeded() {
        let route = Route::builder("slow", "http://b/")
            .timeout(Duration::from_millis(10))
            .build()
            .unwrap();
        let mut ctx = context(route, http::Method::GET, "http://gw.local/");

        let gateway = Gateway::new(
            Arc::new(SlowClient(Duration::from_millis(200))),
            FilterChain::default(),
        );
        let err = gateway.handle(&mut ctx).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert!(err.to_string().contains("slow"));
        assert!(ctx.response.is_none());
    }

    #[tokio::test]
    async fn test_client_failure_is_backend_error() {
        let mut client = MockClient::new();
        client
            .expect_send()
            .returning(|_| Err(Error::Internal("socket closed".to_string())));

        let route = Route::builder("r", "http://b/").build().unwrap();
        let mut ctx = context(route, http::Method::GET, "http://gw.local/");

        let gateway = Gateway::new(Arc::new(client), FilterChain::default());
        let err = gateway.handle(&mut ctx).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Http);
        assert_eq!(err.to_status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_server_errors_trip_breaker() {
        let mut client = MockClient::new();
        client
            .expect_send()
            .times(3)
            .returning(|_| respond(500, "boom"));

        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::new("cb")
                .timeout(Duration::from_secs(60))
                .consecutive_failures(2),
        ));
        let route = Arc::new(
            Route::builder("cb", "http://b/")
                .circuit_breaker(Arc::clone(&breaker))
                .build()
                .unwrap(),
        );
        let gateway = Gateway::new(Arc::new(client), FilterChain::default());

        for _ in 0..3 {
            let request = GatewayRequest::new(http::Method::GET, Url::parse("http://gw/").unwrap());
            let mut ctx = GatewayContext::new(Arc::clone(&route), request);
            gateway.handle(&mut ctx).await.unwrap();
            assert_eq!(ctx.response.unwrap().status, StatusCode::INTERNAL_SERVER_ERROR);
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let request = GatewayRequest::new(http::Method::GET, Url::parse("http://gw/").unwrap());
        let mut ctx = GatewayContext::new(Arc::clone(&route), request);
        let err = gateway.handle(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitBreaker);
        assert_eq!(err.to_status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_post_process_runs_in_reverse_and_stops() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let filter = |name: &'static str, fail_post: bool| {
            Arc::new(Recording {
                name,
                fail_post,
                log: Arc::clone(&log),
            }) as Arc<dyn Filter>
        };

        let mut client = MockClient::new();
        client.expect_send().times(1).returning(|_| respond(200, "ok"));

        let route = Route::builder("order", "http://b/")
            .filter(filter("B", false))
            .filter(filter("C", true))
            .build()
            .unwrap();
        let globals = FilterChain::new(vec![filter("A", false)]);
        let mut ctx = context(route, http::Method::GET, "http://gw/");

        let gateway = Gateway::new(Arc::new(client), globals);
        let err = gateway.handle(&mut ctx).await.unwrap_err();

        assert_eq!(*log.lock(), vec!["A.pre", "B.pre", "C.pre", "C.post"]);
        assert!(err.to_string().contains('C'));
        match &err {
            Error::Route { source, .. } => match source.as_ref() {
                Error::PostFilter { filter, .. } => assert_eq!(filter, "C"),
                other => panic!("unexpected source: {other:?}"),
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
