//! Regex path rewriting

use async_trait::async_trait;
use regex::Regex;
use sluice_core::{Error, Result};
use sluice_router::{Filter, GatewayContext, GATEWAY_ORIGINAL_REQUEST_URL};
use url::Url;

/// Rewrites the request path with a regex substitution
///
/// The replacement uses `$1` / `${name}` group references. `$\{name}` is
/// accepted as an escaped form of `${name}`.
#[derive(Debug, Clone)]
pub struct RewritePath {
    regex: Regex,
    replacement: String,
}

impl RewritePath {
    /// Compile the pattern
    pub fn new(pattern: &str, replacement: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::invalid("regexp", format!("a valid regular expression ({})", e)))?;
        Ok(Self {
            regex,
            replacement: replacement.replace("$\\{", "${"),
        })
    }

    /// Rewritten path, or `None` when the pattern does not match
    pub fn rewrite(&self, path: &str) -> Option<String> {
        self.regex
            .is_match(path)
            .then(|| self.regex.replace_all(path, self.replacement.as_str()).into_owned())
    }
}

#[async_trait]
impl Filter for RewritePath {
    fn name(&self) -> &str {
        "RewritePath"
    }

    async fn pre_process(&self, ctx: &mut GatewayContext) -> Result<()> {
        if ctx.attribute::<Url>(GATEWAY_ORIGINAL_REQUEST_URL).is_none() {
            let original = ctx.request.url.clone();
            ctx.set_attribute(GATEWAY_ORIGINAL_REQUEST_URL, original);
        }

        if let Some(path) = self.rewrite(ctx.request.url.path()) {
            tracing::debug!(from = %ctx.request.url.path(), to = %path, "Path rewritten");
            let mut url = ctx.request.url.clone();
            url.set_path(&path);
            ctx.request.url = url;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use sluice_router::{GatewayRequest, Route};
    use std::sync::Arc;

    fn context(url: &str) -> GatewayContext {
        let route = Arc::new(Route::builder("rewrite", "http://backend/").build().unwrap());
        GatewayContext::new(route, GatewayRequest::new(Method::GET, Url::parse(url).unwrap()))
    }

    #[tokio::test]
    async fn test_rewrite_keeps_query_and_fragment() {
        let filter = RewritePath::new("^/v1/(.*)$", "/$1").unwrap();
        let mut ctx = context("https://gw.local:8443/v1/foo/bar?x=1#top");

        filter.pre_process(&mut ctx).await.unwrap();

        assert_eq!(ctx.request.url.as_str(), "https://gw.local:8443/foo/bar?x=1#top");
        let original = ctx.attribute::<Url>(GATEWAY_ORIGINAL_REQUEST_URL).unwrap();
        assert_eq!(original.path(), "/v1/foo/bar");
    }

    #[tokio::test]
    async fn test_no_match_leaves_path_but_records_original() {
        let filter = RewritePath::new("^/v1/(.*)$", "/$1").unwrap();
        let mut ctx = context("http://gw/v2/foo");

        filter.pre_process(&mut ctx).await.unwrap();

        assert_eq!(ctx.request.url.path(), "/v2/foo");
        assert!(ctx.attribute::<Url>(GATEWAY_ORIGINAL_REQUEST_URL).is_some());
    }

    #[test]
    fn test_escaped_named_group() {
        let filter = RewritePath::new("^/api/(?P<segment>.*)$", "/svc/$\\{segment}").unwrap();
        assert_eq!(filter.rewrite("/api/users/1").as_deref(), Some("/svc/users/1"));
    }

    #[tokio::test]
    async fn test_original_url_kept_across_rewrites() {
        let first = RewritePath::new("^/a/(.*)$", "/b/$1").unwrap();
        let second = RewritePath::new("^/b/(.*)$", "/c/$1").unwrap();
        let mut ctx = context("http://gw/a/x");

        first.pre_process(&mut ctx).await.unwrap();
        second.pre_process(&mut ctx).await.unwrap();

        assert_eq!(ctx.request.url.path(), "/c/x");
        let original = ctx.attribute::<Url>(GATEWAY_ORIGINAL_REQUEST_URL).unwrap();
        assert_eq!(original.path(), "/a/x");
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(RewritePath::new("(", "/").is_err());
    }
}
