//! Built-in filter, rate limiter and key function builders

use crate::header::{HeaderFilter, HeaderOp, HeaderTarget};
use crate::keyfunc::{HeaderKey, IpKey, KeyFunction, PathKey, PathMethodKey, QueryKey};
use crate::limiter::{InMemoryLimiter, RateLimiter};
use crate::logger::{RequestResponseLogger, DEFAULT_MAX_BODY_BYTES};
use crate::rate_limit::RateLimitFilter;
use crate::rewrite::RewritePath;
use sluice_core::{Args, Clock, Error, Factory, Registry, Result, Spec};
use sluice_router::Filter;
use std::sync::Arc;
use tracing::Level;

/// Registry of filter builders
pub type FilterRegistry = Registry<dyn Filter>;

/// Frozen filter registry
pub type FilterFactory = Factory<dyn Filter>;

/// Registry of rate limiter builders
pub type LimiterRegistry = Registry<dyn RateLimiter>;

/// Frozen rate limiter registry
pub type LimiterFactory = Factory<dyn RateLimiter>;

/// Registry of key function builders
pub type KeyFunctionRegistry = Registry<dyn KeyFunction>;

/// Frozen key function registry
pub type KeyFunctionFactory = Factory<dyn KeyFunction>;

/// Rate limiter used when a `RateLimit` filter names none
pub const DEFAULT_LIMITER: &str = "in-memory";

/// Key function used when a `RateLimit` filter names none
pub const DEFAULT_KEY_FUNCTION: &str = "ip";

fn register_header(
    registry: &mut FilterRegistry,
    name: &str,
    target: HeaderTarget,
    with_value: fn(http::HeaderValue) -> HeaderOp,
) -> Result<()> {
    registry.register(name, move |args: &Args| {
        let header = args.get_str("name")?;
        let value = HeaderFilter::value(args.get_str("value")?)?;
        let filter = HeaderFilter::new(target, header, with_value(value))?;
        Ok(Arc::new(filter) as Arc<dyn Filter>)
    })
}

fn register_remove(registry: &mut FilterRegistry, name: &str, target: HeaderTarget) -> Result<()> {
    registry.register(name, move |args: &Args| {
        let filter = HeaderFilter::new(target, args.get_str("name")?, HeaderOp::Remove)?;
        Ok(Arc::new(filter) as Arc<dyn Filter>)
    })
}

/// Registry preloaded with every built-in filter; `RateLimit` resolves its
/// nested specs through `limiters` and `keys`
pub fn default_filter_registry(
    limiters: LimiterFactory,
    keys: KeyFunctionFactory,
) -> Result<FilterRegistry> {
    let mut registry = FilterRegistry::new("filter");

    register_header(&mut registry, "AddRequestHeader", HeaderTarget::Request, HeaderOp::Add)?;
    register_header(&mut registry, "SetRequestHeader", HeaderTarget::Request, HeaderOp::Set)?;
    register_remove(&mut registry, "RemoveRequestHeader", HeaderTarget::Request)?;
    register_header(&mut registry, "AddResponseHeader", HeaderTarget::Response, HeaderOp::Add)?;
    register_header(&mut registry, "SetResponseHeader", HeaderTarget::Response, HeaderOp::Set)?;
    register_remove(&mut registry, "RemoveResponseHeader", HeaderTarget::Response)?;

    registry.register("RewritePath", |args: &Args| {
        let filter = RewritePath::new(args.get_str("regexp")?, args.get_str("replacement")?)?;
        Ok(Arc::new(filter) as Arc<dyn Filter>)
    })?;

    registry.register("RequestResponseLogger", |args: &Args| {
        let level = match args.get_opt_str("level")? {
            Some(level) => RequestResponseLogger::parse_level(level)?,
            None => Level::INFO,
        };
        let max_body_bytes = if args.contains("max-body-bytes") {
            usize::try_from(args.get_u64("max-body-bytes")?)
                .map_err(|_| Error::invalid("max-body-bytes", "a byte count"))?
        } else {
            DEFAULT_MAX_BODY_BYTES
        };
        let filter = RequestResponseLogger::new(level).with_max_body_bytes(max_body_bytes);
        Ok(Arc::new(filter) as Arc<dyn Filter>)
    })?;

    registry.register("RateLimit", move |args: &Args| {
        let limiter = args
            .get_spec("limiter")?
            .unwrap_or_else(|| Spec::named(DEFAULT_LIMITER));
        let key = args
            .get_spec("key")?
            .unwrap_or_else(|| Spec::named(DEFAULT_KEY_FUNCTION));

        let filter = RateLimitFilter::new(
            limiters.build(&limiter.name, &limiter.args)?,
            keys.build(&key.name, &key.args)?,
        );
        Ok(Arc::new(filter) as Arc<dyn Filter>)
    })?;

    Ok(registry)
}

/// Registry preloaded with the `in-memory` limiter
pub fn default_limiter_registry(clock: Arc<dyn Clock>) -> Result<LimiterRegistry> {
    let mut registry = LimiterRegistry::new("rate limiter");

    registry.register(DEFAULT_LIMITER, move |args: &Args| {
        let rate = args.get_f64("rate")?;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(Error::invalid("rate", "a positive number of tokens per second"));
        }
        let burst = args.get_u64("burst")?;
        if burst == 0 {
            return Err(Error::invalid("burst", "at least 1"));
        }
        Ok(Arc::new(InMemoryLimiter::new(rate, burst, clock.clone())) as Arc<dyn RateLimiter>)
    })?;

    Ok(registry)
}

/// Registry preloaded with every built-in key function
pub fn default_key_function_registry() -> Result<KeyFunctionRegistry> {
    let mut registry = KeyFunctionRegistry::new("key function");

    registry.register(DEFAULT_KEY_FUNCTION, |_: &Args| Ok(Arc::new(IpKey) as Arc<dyn KeyFunction>))?;
    registry.register("path", |_: &Args| Ok(Arc::new(PathKey) as Arc<dyn KeyFunction>))?;
    registry.register("path-method", |_: &Args| {
        Ok(Arc::new(PathMethodKey) as Arc<dyn KeyFunction>)
    })?;
    registry.register("header", |args: &Args| {
        Ok(Arc::new(HeaderKey::new(args.get_str("name")?)?) as Arc<dyn KeyFunction>)
    })?;
    registry.register("query", |args: &Args| {
        Ok(Arc::new(QueryKey::new(args.get_str("name")?)) as Arc<dyn KeyFunction>)
    })?;

    Ok(registry)
}

/// Filter factory wired to the default limiter and key function registries
pub fn default_filter_factory(clock: Arc<dyn Clock>) -> Result<FilterFactory> {
    let limiters = default_limiter_registry(clock)?.into_factory();
    let keys = default_key_function_registry()?.into_factory();
    Ok(default_filter_registry(limiters, keys)?.into_factory())
}
