//! Route definition and builder

use crate::filter::{Filter, FilterChain};
use crate::predicate::{test_all, Predicate};
use http::request::Parts;
use sluice_core::{Error, Result};
use sluice_health::CircuitBreaker;
use std::sync::Arc;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use url::Url;

/// Route definition
#[derive(Debug)]
pub struct Route {
    /// Route ID
    pub id: String,

    /// Backend base URI (scheme, host and port are used)
    pub uri: Url,

    /// All must match for the route to be selected
    pub predicates: Vec<Arc<dyn Predicate>>,

    /// Route-specific filters, run after global filters on the way in
    pub filters: FilterChain,

    /// Per-request deadline
    pub timeout: Option<Duration>,

    /// Breaker guarding the backend
    pub circuit_breaker: Option<Arc<CircuitBreaker>>,

    /// Most verbose level logged for this route
    pub log_level: Option<LevelFilter>,
}

impl Route {
    /// Create a new route builder
    pub fn builder(id: impl Into<String>, uri: impl Into<String>) -> RouteBuilder {
        RouteBuilder::new(id, uri)
    }

    /// Whether every predicate accepts the request
    pub fn matches(&self, req: &Parts) -> bool {
        test_all(&self.predicates, req)
    }

    /// Backend URL for a request: scheme, host and port from the route URI,
    /// path and raw query from the request, no fragment
    pub fn destination_url(&self, request_url: &Url) -> Url {
        let mut url = self.uri.clone();
        url.set_path(request_url.path());
        url.set_query(request_url.query());
        url.set_fragment(None);
        url
    }

    /// `[globals..., route filters...]`
    pub fn combine_global_filters(&self, globals: &FilterChain) -> FilterChain {
        globals.concat(&self.filters)
    }
}

/// Builder for constructing routes
#[derive(Debug)]
pub struct RouteBuilder {
    id: String,
    uri: String,
    predicates: Vec<Arc<dyn Predicate>>,
    filters: Vec<Arc<dyn Filter>>,
    timeout: Option<Duration>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    log_level: Option<LevelFilter>,
}

impl RouteBuilder {
    /// Create a new route builder
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            predicates: Vec::new(),
            filters: Vec::new(),
            timeout: None,
            circuit_breaker: None,
            log_level: None,
        }
    }

    /// Add a predicate
    pub fn predicate(mut self, predicate: Arc<dyn Predicate>) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Add a filter
    pub fn filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Set the per-request timeout (zero disables it)
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Guard the backend with a circuit breaker
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Cap the log level for this route
    pub fn log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Build the route
    pub fn build(self) -> Result<Route> {
        if self.id.is_empty() {
            return Err(Error::Config("route id is required".to_string()));
        }

        let uri = Url::parse(&self.uri)
            .map_err(|e| Error::Config(format!("route '{}': invalid uri '{}': {}", self.id, self.uri, e)))?;

        if !matches!(uri.scheme(), "http" | "https") || uri.host_str().is_none() {
            return Err(Error::Config(format!(
                "route '{}': uri must be an absolute http or https URL",
                self.id
            )));
        }

        Ok(Route {
            id: self.id,
            uri,
            predicates: self.predicates,
            filters: FilterChain::new(self.filters),
            timeout: self.timeout,
            circuit_breaker: self.circuit_breaker,
            log_level: self.log_level,
        })
    }
}
