//! Configuration validation

use crate::types::{Config, SpecConfig};
use sluice_core::{Error, Result};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use url::Url;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server(config)?;
    validate_routes(config)?;
    validate_httpclient(config)?;
    Ok(())
}

fn validate_server(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        return Err(Error::Config("server port must be > 0".to_string()));
    }
    if config.server.max_header_bytes == 0 {
        return Err(Error::Config("max-header-bytes must be > 0".to_string()));
    }
    Ok(())
}

fn validate_specs(owner: &str, kind: &str, specs: &[SpecConfig]) -> Result<()> {
    if let Some(position) = specs.iter().position(|s| s.name.trim().is_empty()) {
        return Err(Error::Config(format!(
            "{}: {} #{} has an empty name",
            owner,
            kind,
            position + 1
        )));
    }
    Ok(())
}

fn validate_routes(config: &Config) -> Result<()> {
    let gateway = &config.gateway;
    if gateway.routes.is_empty() {
        return Err(Error::Config("at least one route is required".to_string()));
    }

    validate_specs("global-filters", "filter", &gateway.global_filters)?;

    let mut seen = HashSet::new();
    for route in &gateway.routes {
        if route.id.trim().is_empty() {
            return Err(Error::Config("route id cannot be empty".to_string()));
        }
        if !seen.insert(route.id.as_str()) {
            return Err(Error::Config(format!("duplicate route id '{}'", route.id)));
        }

        let owner = format!("route '{}'", route.id);
        let uri = Url::parse(&route.uri)
            .map_err(|e| Error::Config(format!("{}: invalid uri '{}': {}", owner, route.uri, e)))?;
        if !matches!(uri.scheme(), "http" | "https") || !uri.has_host() {
            return Err(Error::Config(format!(
                "{}: uri '{}' must be an absolute http or https URL",
                owner, route.uri
            )));
        }

        validate_specs(&owner, "predicate", &route.predicates)?;
        validate_specs(&owner, "filter", &route.filters)?;

        if route.predicates.is_empty() {
            tracing::warn!(route = %route.id, "Route has no predicates and matches every request");
        }

        if let Some(level) = &route.log_level {
            LevelFilter::from_str(level).map_err(|_| {
                Error::Config(format!("{}: invalid log-level '{}'", owner, level))
            })?;
        }

        if let Some(breaker) = &route.circuit_breaker {
            if breaker.consecutive_failures == 0 {
                return Err(Error::Config(format!(
                    "{}: circuit-breaker consecutive-failures must be > 0",
                    owner
                )));
            }
        }
    }

    Ok(())
}

fn validate_httpclient(config: &Config) -> Result<()> {
    let client = &config.gateway.httpclient;
    if let Some(tls) = &client.tls {
        if tls.cert_file.is_some() != tls.key_file.is_some() {
            return Err(Error::Config(
                "httpclient tls cert-file and key-file must be set together".to_string(),
            ));
        }
    }
    if client.insecure_skip_verify {
        tracing::warn!("Backend TLS certificate verification is disabled");
    }
    Ok(())
}
