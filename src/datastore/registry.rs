use std::collections::HashMap;
use std::sync::Arc;

use super::{Indexer, IndexerProvider};
use crate::error::{ExecError, ExecResult};

/// Collects indexer providers during startup.
#[derive(Default)]
pub struct IndexerRegistryBuilder {
    providers: HashMap<String, Arc<dyn IndexerProvider>>,
}

impl IndexerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under `name`, replacing any earlier one.
    pub fn register(mut self, name: impl Into<String>, provider: Arc<dyn IndexerProvider>) -> Self {
        let name = name.into();
        if self.providers.insert(name.clone(), provider).is_some() {
            tracing::warn!("Indexer provider '{}' registered twice, keeping the last", name);
        }
        self
    }

    pub fn build(self) -> IndexerRegistry {
        IndexerRegistry {
            providers: self.providers,
        }
    }
}

/// Immutable map of indexer providers, shared by every query context.
#[derive(Default)]
pub struct IndexerRegistry {
    providers: HashMap<String, Arc<dyn IndexerProvider>>,
}

impl IndexerRegistry {
    pub fn builder() -> IndexerRegistryBuilder {
        IndexerRegistryBuilder::new()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn create_indexer(
        &self,
        provider: &str,
        cluster_url: &str,
        namespace: &str,
        keyspace: &str,
    ) -> ExecResult<Arc<dyn Indexer>> {
        let p = self
            .providers
            .get(provider)
            .ok_or_else(|| ExecError::ProviderNotFound(provider.to_string()))?;
        p.create(cluster_url, namespace, keyspace)
    }
}

impl std::fmt::Debug for IndexerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerRegistry")
            .field("providers", &self.provider_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{MemoryIndex, MemoryIndexer, MemoryProvider};
    use serde_json::json;

    #[test]
    fn test_create_from_registered_provider() {
        let indexer = MemoryIndexer::new("users")
            .with_index(MemoryIndex::new("by_age", "users").with_entry(json!(30), "alice"));
        let provider = MemoryProvider::new().with_indexer("default", indexer);

        let registry = IndexerRegistry::builder()
            .register("memory", Arc::new(provider))
            .build();

        assert_eq!(registry.provider_names(), vec!["memory"]);
        let indexer = registry
            .create_indexer("memory", "local:", "default", "users")
            .unwrap();
        assert_eq!(indexer.keyspace_id(), "users");
        assert_eq!(indexer.index_by_name("by_age").unwrap().name(), "by_age");
    }

    #[test]
    fn test_unknown_provider() {
        let registry = IndexerRegistry::empty();
        let err = registry
            .create_indexer("gsi", "local:", "default", "users")
            .err()
            .unwrap();
        assert_eq!(err, ExecError::ProviderNotFound("gsi".to_string()));
    }
}
