//! Build routes, filters and the backend client from configuration

use sluice_config::{CircuitBreakerSettings, Config, GatewayConfig, HttpClientConfig, RouteConfig};
use sluice_core::{Clock, Error, Result};
use sluice_filters::{default_filter_factory, FilterFactory, FilterRegistry};
use sluice_health::{CircuitBreaker, CircuitBreakerConfig};
use sluice_proxy::{ClientConfig, ClientTls};
use sluice_router::{
    default_predicate_registry, FilterChain, PredicateFactory, PredicateRegistry, Route,
    RoutingTable,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};

/// Frozen predicate and filter builders
#[derive(Debug, Clone)]
pub struct Registries {
    predicates: PredicateFactory,
    filters: FilterFactory,
    clock: Arc<dyn Clock>,
}

impl Registries {
    /// Built-in predicates and filters, reading time from `clock`
    pub fn builtin(clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            predicates: default_predicate_registry(Arc::clone(&clock))?.into_factory(),
            filters: default_filter_factory(Arc::clone(&clock))?,
            clock,
        })
    }

    /// Freeze registries that may carry custom builders
    pub fn from_registries(
        predicates: PredicateRegistry,
        filters: FilterRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            predicates: predicates.into_factory(),
            filters: filters.into_factory(),
            clock,
        }
    }

    /// Predicate builders
    pub fn predicates(&self) -> &PredicateFactory {
        &self.predicates
    }

    /// Filter builders
    pub fn filters(&self) -> &FilterFactory {
        &self.filters
    }
}

fn non_zero(duration: Option<Duration>) -> Option<Duration> {
    duration.filter(|d| !d.is_zero())
}

fn build_breaker(id: &str, settings: &CircuitBreakerSettings, clock: Arc<dyn Clock>) -> CircuitBreaker {
    let config = CircuitBreakerConfig::new(id)
        .max_requests(settings.max_requests)
        .interval(settings.interval)
        .timeout(settings.timeout)
        .consecutive_failures(settings.consecutive_failures)
        .on_state_change(|name, from, to| {
            info!(breaker = %name, from = ?from, to = ?to, "Circuit breaker state changed");
        });
    CircuitBreaker::with_clock(config, clock)
}

/// Build one route; a route without a timeout inherits `global_timeout`
pub fn build_route(
    config: &RouteConfig,
    global_timeout: Option<Duration>,
    registries: &Registries,
) -> Result<Route> {
    let annotate = |kind: &str, name: &str, err: Error| {
        Error::Config(format!("route '{}': {kind} '{name}': {err}", config.id))
    };

    let mut builder = Route::builder(&config.id, &config.uri);

    for spec in &config.predicates {
        let predicate = registries
            .predicates
            .build(&spec.name, &spec.args)
            .map_err(|e| annotate("predicate", &spec.name, e))?;
        builder = builder.predicate(predicate);
    }

    for spec in &config.filters {
        let filter = registries
            .filters
            .build(&spec.name, &spec.args)
            .map_err(|e| annotate("filter", &spec.name, e))?;
        builder = builder.filter(filter);
    }

    if let Some(timeout) = non_zero(config.timeout.or(global_timeout)) {
        builder = builder.timeout(timeout);
    }

    if let Some(settings) = &config.circuit_breaker {
        let breaker = build_breaker(&config.id, settings, Arc::clone(&registries.clock));
        builder = builder.circuit_breaker(Arc::new(breaker));
    }

    if let Some(level) = &config.log_level {
        let level = LevelFilter::from_str(level).map_err(|_| {
            Error::Config(format!("route '{}': invalid log-level '{level}'", config.id))
        })?;
        builder = builder.log_level(level);
    }

    builder.build()
}

/// Build the routing table in configuration order
pub fn build_routing_table(gateway: &GatewayConfig, registries: &Registries) -> Result<RoutingTable> {
    let routes = gateway
        .routes
        .iter()
        .map(|route| build_route(route, gateway.global_timeout, registries))
        .collect::<Result<Vec<_>>>()?;

    for route in &routes {
        debug!(
            route = %route.id,
            uri = %route.uri,
            predicates = route.predicates.len(),
            filters = ?route.filters.names(),
            timeout = ?route.timeout,
            "Route loaded"
        );
    }

    Ok(RoutingTable::new(routes))
}

/// Build the global filter chain
pub fn build_global_filters(gateway: &GatewayConfig, registries: &Registries) -> Result<FilterChain> {
    let filters = gateway
        .global_filters
        .iter()
        .map(|spec| {
            registries
                .filters
                .build(&spec.name, &spec.args)
                .map_err(|e| Error::Config(format!("global filter '{}': {e}", spec.name)))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(FilterChain::new(filters))
}

/// Backend client settings from configuration
pub fn client_config(config: &HttpClientConfig) -> ClientConfig {
    ClientConfig {
        connect_timeout: config.connect_timeout,
        pool_idle_timeout: config.pool_idle_timeout,
        pool_max_idle_per_host: config.pool_max_idle_per_host,
        insecure_skip_verify: config.insecure_skip_verify,
        tls: config.tls.as_ref().map(|tls| ClientTls {
            ca_file: tls.ca_file.clone(),
            cert_file: tls.cert_file.clone(),
            key_file: tls.key_file.clone(),
        }),
    }
}

/// Build the routing table and global filters for `config`
pub fn assemble(config: &Config, registries: &Registries) -> Result<(RoutingTable, FilterChain)> {
    let table = build_routing_table(&config.gateway, registries)?;
    let globals = build_global_filters(&config.gateway, registries)?;
    info!(
        routes = table.len(),
        global_filters = ?globals.names(),
        "Gateway assembled"
    );
    Ok((table, globals))
}
