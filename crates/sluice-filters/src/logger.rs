//! Request/Response logging filter

use async_trait::async_trait;
use http::HeaderMap;
use sluice_core::{Error, Result};
use sluice_router::{Filter, GatewayContext};
use std::str::FromStr;
use tracing::Level;

/// Default cap on logged body bytes
pub const DEFAULT_MAX_BODY_BYTES: usize = 4096;

const SENSITIVE_HEADERS: [&str; 4] = ["authorization", "cookie", "set-cookie", "x-api-key"];

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        if $level == Level::ERROR {
            tracing::error!($($arg)+)
        } else if $level == Level::WARN {
            tracing::warn!($($arg)+)
        } else if $level == Level::INFO {
            tracing::info!($($arg)+)
        } else if $level == Level::DEBUG {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

/// Logs the request in pre-process and the response in post-process
///
/// Bodies are captured before logging so the backend and the client still
/// receive them in full.
#[derive(Debug, Clone)]
pub struct RequestResponseLogger {
    level: Level,
    max_body_bytes: usize,
}

impl RequestResponseLogger {
    /// Log at `level`
    pub fn new(level: Level) -> Self {
        Self {
            level,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Parse a level name (`trace` .. `error`)
    pub fn parse_level(level: &str) -> Result<Level> {
        Level::from_str(level).map_err(|_| Error::invalid("level", "one of trace, debug, info, warn, error"))
    }

    /// Cap logged body bytes
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Configured level
    pub fn level(&self) -> Level {
        self.level
    }

    fn body_preview(&self, body: Option<&[u8]>) -> String {
        let body = body.unwrap_or_default();
        let shown = &body[..body.len().min(self.max_body_bytes)];
        let mut preview = String::from_utf8_lossy(shown).into_owned();
        if body.len() > shown.len() {
            preview.push_str("...");
        }
        preview
    }
}

fn redacted_headers(headers: &HeaderMap) -> Vec<String> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                "[REDACTED]"
            } else {
                value.to_str().unwrap_or("[invalid UTF-8]")
            };
            format!("{}: {}", name, shown)
        })
        .collect()
}

#[async_trait]
impl Filter for RequestResponseLogger {
    fn name(&self) -> &str {
        "RequestResponseLogger"
    }

    async fn pre_process(&self, ctx: &mut GatewayContext) -> Result<()> {
        if !ctx.logger().enabled(self.level) {
            return Ok(());
        }

        let scope = ctx.scope();
        scope.run(ctx.request.body.capture()).await?;

        let request = &ctx.request;
        let headers = redacted_headers(&request.headers);
        let body = self.body_preview(request.body.captured_bytes());
        ctx.logger().span().in_scope(|| {
            log_at!(
                self.level,
                route = %ctx.route.id,
                method = %request.method,
                url = %request.url,
                headers = ?headers,
                body = %body,
                "Gateway request"
            )
        });
        Ok(())
    }

    async fn post_process(&self, ctx: &mut GatewayContext) -> Result<()> {
        if !ctx.logger().enabled(self.level) {
            return Ok(());
        }
        let scope = ctx.scope();
        let Some(response) = ctx.response.as_mut() else {
            return Ok(());
        };
        scope.run(response.body.capture()).await?;

        let headers = redacted_headers(&response.headers);
        let body = self.body_preview(response.body.captured_bytes());
        let status = response.status.as_u16();
        ctx.logger().span().in_scope(|| {
            log_at!(
                self.level,
                route = %ctx.route.id,
                status = status,
                headers = ?headers,
                body = %body,
                "Gateway response"
            )
        });
        Ok(())
    }
}
