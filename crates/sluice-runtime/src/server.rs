//! HTTP server with graceful shutdown

use crate::handler::GatewayHandler;
use crate::io::{ActiveRequests, TimeoutIo, TrackedBody};
use crate::shutdown::ShutdownSignal;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use sluice_config::ServerConfig;
use sluice_core::{Error, Result};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::task::TaskTracker;

/// Smallest read buffer hyper accepts
const MIN_BUF_SIZE: usize = 8192;

fn limit(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

/// HTTP/1.1 server in front of a [`GatewayHandler`]
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    handler: Arc<GatewayHandler>,
    shutdown: ShutdownSignal,
}

impl Server {
    /// Create a server
    pub fn new(config: ServerConfig, handler: Arc<GatewayHandler>, shutdown: ShutdownSignal) -> Self {
        Self {
            config,
            handler,
            shutdown,
        }
    }

    /// Listen address from configuration
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.config.address, self.config.port)
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let addr = self.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind to {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        tracing::info!(listen = %local, routes = self.handler.table().len(), "Server starting");

        let tracker = TaskTracker::new();
        let mut shutdown_rx = self.shutdown.subscribe();

        if !self.shutdown.is_triggered() {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, remote)) => {
                            tracing::trace!(remote = %remote, "Accepted connection");
                            tracker.spawn(self.connection(stream, remote));
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept connection");
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        drop(listener);
        tracker.close();

        tracing::info!(
            active_connections = tracker.len(),
            timeout_secs = self.config.shutdown_timeout.as_secs(),
            "Waiting for in-flight requests to complete"
        );

        if tokio::time::timeout(self.config.shutdown_timeout, tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                active_connections = tracker.len(),
                "Shutdown timeout reached, aborting requests"
            );
            self.shutdown.abort();
        } else {
            tracing::info!("All connections closed, shutting down cleanly");
        }
        Ok(())
    }

    fn connection(
        &self,
        stream: TcpStream,
        remote: SocketAddr,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let handler = Arc::clone(&self.handler);
        let mut shutdown_rx = self.shutdown.subscribe();
        let draining = self.shutdown.is_triggered();

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .max_buf_size(self.config.max_header_bytes.max(MIN_BUF_SIZE));
        if let Some(timeout) = limit(self.config.read_header_timeout) {
            builder.header_read_timeout(timeout);
        }

        // The idle limit only covers the wait between requests
        let active = ActiveRequests::new();
        let io = TokioIo::new(
            TimeoutIo::new(
                stream,
                limit(self.config.idle_timeout),
                limit(self.config.write_timeout),
            )
            .pause_reads_while(active.clone()),
        );

        async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let handler = Arc::clone(&handler);
                let guard = active.enter();
                async move {
                    let response = handler.handle(req, Some(remote)).await;
                    Ok::<_, Infallible>(response.map(|body| TrackedBody::new(body, guard)))
                }
            });

            let mut conn = pin!(builder.serve_connection(io, service));
            if draining {
                conn.as_mut().graceful_shutdown();
            }

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = shutdown_rx.recv() => {
                    conn.as_mut().graceful_shutdown();
                    conn.as_mut().await
                }
            };

            if let Err(e) = result {
                tracing::debug!(remote = %remote, error = %e, "Connection closed with error");
            }
        }
    }
}
