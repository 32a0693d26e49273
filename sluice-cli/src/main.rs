//! Sluice CLI

use anyhow::{Context, Result};
use clap::Parser;
use sluice_config::{load_config, Config, LogFormat};
use sluice_runtime::Application;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Sluice API Gateway", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file (YAML, TOML or JSON)
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long, env = "SLUICE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Listen port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(path) = cli.config.clone() else {
        init_tracing(cli.log_level.as_deref().unwrap_or("info"), LogFormat::Text)?;
        tracing::error!("configuration file path is required");
        std::process::exit(1);
    };

    let mut config = match load_config(&path) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(cli.log_level.as_deref().unwrap_or("info"), LogFormat::Text)?;
            tracing::error!(path = %path.display(), error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_tracing(&level, config.logging.format)?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }

    summarize(&path, &config);
    let app = Application::from_config(config).context("failed to assemble gateway")?;
    if cli.check {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    app.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn summarize(path: &std::path::Path, config: &Config) {
    tracing::info!(
        path = %path.display(),
        address = %config.server.address,
        port = config.server.port,
        routes = config.gateway.routes.len(),
        global_filters = config.gateway.global_filters.len(),
        "Configuration loaded"
    );
}

fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level '{level}'"))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_level(true))
            .init(),
    }

    Ok(())
}
