//! Ordered routing table

use crate::route::Route;
use http::request::Parts;
use std::sync::Arc;

/// Ordered list of routes with first-match lookup
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: Vec<Arc<Route>>,
}

impl RoutingTable {
    /// Create a table; order is match order
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    /// First route whose predicates all accept the request
    pub fn find_matching(&self, req: &Parts) -> Option<&Arc<Route>> {
        let found = self.routes.iter().find(|route| route.matches(req));
        if let Some(route) = found {
            tracing::trace!(route = %route.id, path = %req.uri.path(), "Route matched");
        }
        found
    }

    /// Look up a route by ID
    pub fn get(&self, id: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|route| route.id == id)
    }

    /// Routes in match order
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
