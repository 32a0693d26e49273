//! Configuration builder

use crate::types::{Config, HttpClientConfig, RouteConfig, SpecConfig};
use sluice_core::{Args, Result};
use std::time::Duration;

/// Builder for constructing configuration programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listen port
    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Set the bind address
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.server.address = address.into();
        self
    }

    /// Append a route
    pub fn route(mut self, route: RouteConfig) -> Self {
        self.config.gateway.routes.push(route);
        self
    }

    /// Append a global filter
    pub fn global_filter(mut self, name: impl Into<String>, args: Args) -> Self {
        self.config
            .gateway
            .global_filters
            .push(SpecConfig::new(name, args));
        self
    }

    /// Deadline for routes without their own
    pub fn global_timeout(mut self, timeout: Duration) -> Self {
        self.config.gateway.global_timeout = Some(timeout);
        self
    }

    /// Backend client settings
    pub fn httpclient(mut self, httpclient: HttpClientConfig) -> Self {
        self.config.gateway.httpclient = httpclient;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<Config> {
        crate::validator::validate_config(&self.config)?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .port(9090)
            .global_timeout(Duration::from_secs(3))
            .global_filter("RequestResponseLogger", Args::new())
            .route(RouteConfig::new("r", "http://b/"))
            .build()
            .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.gateway.routes.len(), 1);
        assert_eq!(config.gateway.global_filters[0].name, "RequestResponseLogger");
    }

    #[test]
    fn test_builder_requires_route() {
        assert!(ConfigBuilder::new().build().is_err());
    }
}
