//! Filter trait and ordered filter chains

use crate::context::GatewayContext;
use async_trait::async_trait;
use sluice_core::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Transformation around the backend call
///
/// `pre_process` runs before the backend is called and may rewrite the
/// request. `post_process` runs after a successful backend call and may
/// rewrite the response. Returning an error aborts the chain.
#[async_trait]
pub trait Filter: Send + Sync + fmt::Debug {
    /// Name the filter was registered under
    fn name(&self) -> &str;

    /// Request-side hook
    async fn pre_process(&self, _ctx: &mut GatewayContext) -> Result<()> {
        Ok(())
    }

    /// Response-side hook
    async fn post_process(&self, _ctx: &mut GatewayContext) -> Result<()> {
        Ok(())
    }
}

/// Ordered list of filters
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    /// Create a chain
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// Append a filter
    pub fn push(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    /// `[self..., other...]`
    pub fn concat(&self, other: &FilterChain) -> FilterChain {
        let mut filters = Vec::with_capacity(self.filters.len() + other.filters.len());
        filters.extend(self.filters.iter().cloned());
        filters.extend(other.filters.iter().cloned());
        FilterChain { filters }
    }

    /// Filters in order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Filter>> {
        self.filters.iter()
    }

    /// Number of filters
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the chain is empty
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Names in order
    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Run every `pre_process` in order, stopping at the first error
    pub async fn pre_process_all(&self, ctx: &mut GatewayContext) -> Result<()> {
        for filter in &self.filters {
            filter
                .pre_process(ctx)
                .await
                .map_err(|e| Error::pre_filter(filter.name(), e))?;
        }
        Ok(())
    }

    /// Run every `post_process` in reverse order, stopping at the first error
    pub async fn post_process_all(&self, ctx: &mut GatewayContext) -> Result<()> {
        for filter in self.filters.iter().rev() {
            filter
                .post_process(ctx)
                .await
                .map_err(|e| Error::post_filter(filter.name(), e))?;
        }
        Ok(())
    }
}

impl From<Vec<Arc<dyn Filter>>> for FilterChain {
    fn from(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self::new(filters)
    }
}
