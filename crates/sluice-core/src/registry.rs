//! Name-to-builder registries
//!
//! A [`Registry`] is filled at startup, then frozen into a [`Factory`] that
//! builds instances by name. The same generic type backs predicates, filters,
//! rate limiters and key functions.

use crate::args::Args;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builder callable: turns arguments into an instance
pub type Builder<T> = Arc<dyn Fn(&Args) -> Result<Arc<T>> + Send + Sync>;

/// Mutable collection of named builders
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    builders: HashMap<String, Builder<T>>,
}

impl<T: ?Sized> Registry<T> {
    /// Create an empty registry; `kind` names the instances in error messages
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            builders: HashMap::new(),
        }
    }

    /// Register a builder under a unique name
    pub fn register<F>(&mut self, name: impl Into<String>, builder: F) -> Result<()>
    where
        F: Fn(&Args) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.builders.contains_key(&name) {
            return Err(Error::Config(format!(
                "{} '{}' already registered",
                self.kind, name
            )));
        }

        tracing::debug!(kind = self.kind, name = %name, "Builder registered");
        self.builders.insert(name, Arc::new(builder));
        Ok(())
    }

    /// Look up a builder
    pub fn get(&self, name: &str) -> Option<&Builder<T>> {
        self.builders.get(name)
    }

    /// Whether a builder exists
    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of builders
    pub fn len(&self) -> usize {
        self.builders.len()
    }

    /// Whether no builders are registered
    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Instance kind
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Freeze into a read-only factory
    pub fn into_factory(self) -> Factory<T> {
        Factory {
            registry: Arc::new(self),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("builders", &self.names())
            .finish()
    }
}

/// Read-only, cheaply cloneable view over a registry
pub struct Factory<T: ?Sized> {
    registry: Arc<Registry<T>>,
}

impl<T: ?Sized> Factory<T> {
    /// Build an instance by name
    pub fn build(&self, name: &str, args: &Args) -> Result<Arc<T>> {
        let builder = self.registry.get(name).ok_or_else(|| Error::UnknownBuilder {
            kind: self.registry.kind,
            name: name.to_string(),
        })?;
        builder(args)
    }

    /// Underlying registry
    pub fn registry(&self) -> &Registry<T> {
        &self.registry
    }
}

impl<T: ?Sized> Clone for Factory<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Factory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("registry", &self.registry)
            .finish()
    }
}
