//! Rate limiting filter

use crate::keyfunc::KeyFunction;
use crate::limiter::RateLimiter;
use async_trait::async_trait;
use sluice_core::{Error, Result};
use sluice_router::{Filter, GatewayContext};
use std::sync::Arc;

/// Charges each request against the bucket picked by a key function
#[derive(Debug, Clone)]
pub struct RateLimitFilter {
    limiter: Arc<dyn RateLimiter>,
    key: Arc<dyn KeyFunction>,
}

impl RateLimitFilter {
    /// Create from a limiter and a key function
    pub fn new(limiter: Arc<dyn RateLimiter>, key: Arc<dyn KeyFunction>) -> Self {
        Self { limiter, key }
    }
}

#[async_trait]
impl Filter for RateLimitFilter {
    fn name(&self) -> &str {
        "RateLimit"
    }

    async fn pre_process(&self, ctx: &mut GatewayContext) -> Result<()> {
        let key = self.key.key(&ctx.request);
        let decision = self.limiter.allow(&key);

        if !decision.allowed {
            tracing::debug!(
                route = %ctx.route.id,
                key_function = self.key.name(),
                key = %key,
                remaining = decision.remaining,
                "Rate limit exceeded"
            );
            return Err(Error::RateLimitExceeded {
                remaining: decision.remaining,
            });
        }
        Ok(())
    }
}
