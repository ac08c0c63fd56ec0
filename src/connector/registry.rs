//! Source registry
//!
//! Maps source names to sources and opens connections by name.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::errors::{ConnectorError, ConnectorResult};
use super::{ConnectionFactory, RepositoryConnection, RepositorySource};

/// Named backing sources
#[derive(Default)]
pub struct SourceRegistry {
    sources: RwLock<BTreeMap<String, Arc<dyn RepositorySource>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under its own name; returns the source it replaced
    pub fn register(&self, source: Arc<dyn RepositorySource>) -> Option<Arc<dyn RepositorySource>> {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.name().to_string(), source)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn RepositorySource>> {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RepositorySource>> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl ConnectionFactory for SourceRegistry {
    fn create_connection(&self, source_name: &str) -> ConnectorResult<Box<dyn RepositoryConnection>> {
        match self.get(source_name) {
            Some(source) => source.connect(),
            None => Err(ConnectorError::unavailable(
                source_name,
                "no source is registered under this name",
            )),
        }
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::InMemoryRepositorySource;

    #[test]
    fn test_register_and_connect() {
        let registry = SourceRegistry::new();
        assert!(registry
            .register(Arc::new(InMemoryRepositorySource::new("store")))
            .is_none());
        assert_eq!(registry.names(), vec!["store".to_string()]);

        let connection = registry.create_connection("store").unwrap();
        assert_eq!(connection.source_name(), "store");
    }

    #[test]
    fn test_unknown_source_is_unavailable() {
        let registry = SourceRegistry::new();
        let err = registry.create_connection("missing").err().unwrap();
        assert_eq!(err.code(), "CONNECTOR_UNAVAILABLE");
    }

    #[test]
    fn test_register_replaces() {
        let registry = SourceRegistry::new();
        registry.register(Arc::new(InMemoryRepositorySource::new("store")));
        let replaced = registry.register(Arc::new(InMemoryRepositorySource::new("store")));
        assert!(replaced.is_some());
        assert!(registry.remove("store").is_some());
        assert!(registry.get("store").is_none());
    }
}
