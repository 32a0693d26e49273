//! Application wiring: configuration in, running gateway out

use crate::assemble::{assemble, client_config, Registries};
use crate::gateway::Gateway;
use crate::handler::{CustomHandler, GatewayHandler};
use crate::server::Server;
use crate::shutdown::{ShutdownSignal, SignalHandler};
use sluice_config::{validate_config, Config};
use sluice_core::{system_clock, Result};
use sluice_proxy::{HttpClient, PooledClient};
use std::sync::Arc;

/// Fully assembled gateway
#[derive(Debug)]
pub struct Application {
    config: Config,
    handler: GatewayHandler,
    shutdown: ShutdownSignal,
}

impl Application {
    /// Build from configuration with the built-in predicates and filters
    pub fn from_config(config: Config) -> Result<Self> {
        Self::with_registries(config, &Registries::builtin(system_clock())?)
    }

    /// Build from configuration with custom registries
    pub fn with_registries(config: Config, registries: &Registries) -> Result<Self> {
        let client = PooledClient::new(client_config(&config.gateway.httpclient))?;
        Self::with_client(config, registries, Arc::new(client))
    }

    /// Build from configuration with a custom backend client
    pub fn with_client(
        config: Config,
        registries: &Registries,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        validate_config(&config)?;

        let (table, globals) = assemble(&config, registries)?;
        let shutdown = ShutdownSignal::new();
        let handler = GatewayHandler::new(table, Gateway::new(client, globals))
            .with_shutdown(shutdown.request_token().clone())
            .with_read_timeout(Some(config.server.read_timeout));

        Ok(Self {
            config,
            handler,
            shutdown,
        })
    }

    /// Mount a custom handler at `"METHOD /path"`
    pub fn custom_handler(mut self, pattern: &str, handler: Arc<dyn CustomHandler>) -> Result<Self> {
        self.handler = self.handler.custom_handler(pattern, handler)?;
        Ok(self)
    }

    /// Request handler
    pub fn handler(&self) -> &GatewayHandler {
        &self.handler
    }

    /// Configuration the application was built from
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Signal that stops the server
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Server over this application's handler
    pub fn server(&self) -> Server {
        Server::new(
            self.config.server.clone(),
            Arc::new(self.handler.clone()),
            self.shutdown.clone(),
        )
    }

    /// Serve until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        tokio::spawn(SignalHandler::new(self.shutdown.clone()).run());
        self.server().run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_config::{ConfigBuilder, RouteConfig};
    use sluice_core::Args;

    #[test]
    fn test_from_config() {
        let config = ConfigBuilder::new()
            .route(
                RouteConfig::new("users", "http://users:8081")
                    .predicate("Path", Args::from_value(json!({"patterns": "/users/**"})).unwrap()),
            )
            .global_filter("RequestResponseLogger", Args::new())
            .build()
            .unwrap();

        let app = Application::from_config(config).unwrap();
        assert_eq!(app.handler().table().len(), 1);
        assert!(!app.shutdown_signal().is_triggered());
    }

    #[test]
    fn test_rejects_unknown_filter() {
        let config = ConfigBuilder::new()
            .route(RouteConfig::new("r", "http://b").filter("Compress", Args::new()))
            .build()
            .unwrap();

        let err = Application::from_config(config).unwrap_err();
        assert!(err.to_string().contains("filter 'Compress' not found"));
    }
}
