//! In-process index provider.
//!
//! Entries are kept sorted by key collation so range spans can be answered
//! directly. Used by the `streamexec` binary and by tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use super::{
    collate, EntryStream, Index, IndexEntry, Indexer, IndexerProvider, ScanConsistency,
    ScanVector, Span,
};
use crate::error::{ExecError, ExecResult};

#[derive(Debug, Clone)]
pub struct MemoryIndex {
    name: String,
    keyspace: String,
    entries: Vec<IndexEntry>,
    seqno: u64,
}

impl MemoryIndex {
    pub fn new(name: impl Into<String>, keyspace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyspace: keyspace.into(),
            entries: Vec::new(),
            seqno: 0,
        }
    }

    pub fn with_entry(mut self, key: Value, primary_key: impl Into<String>) -> Self {
        let entry = IndexEntry {
            entry_key: key,
            primary_key: primary_key.into(),
        };
        let pos = self
            .entries
            .partition_point(|e| collate(&e.entry_key, &entry.entry_key).is_le());
        self.entries.insert(pos, entry);
        self.seqno += 1;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_consistency(
        &self,
        consistency: ScanConsistency,
        vector: Option<&ScanVector>,
    ) -> ExecResult<()> {
        if consistency != ScanConsistency::AtPlus {
            return Ok(());
        }
        let vector = vector.ok_or_else(|| {
            ExecError::Index(format!("{}: at_plus scan requires a scan vector", self.name))
        })?;
        match vector.max_seqno() {
            Some(required) if required > self.seqno => Err(ExecError::Index(format!(
                "{}: scan vector requires seqno {} but index is at {}",
                self.name, required, self.seqno
            ))),
            _ => Ok(()),
        }
    }

    fn matching<'a>(&'a self, span: &'a Span) -> impl Iterator<Item = &'a IndexEntry> + 'a {
        self.entries.iter().filter(move |e| span.contains(&e.entry_key))
    }
}

#[async_trait]
impl Index for MemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn keyspace_id(&self) -> &str {
        &self.keyspace
    }

    async fn count(
        &self,
        span: &Span,
        consistency: ScanConsistency,
        vector: Option<&ScanVector>,
    ) -> ExecResult<i64> {
        self.check_consistency(consistency, vector)?;
        Ok(self.matching(span).count() as i64)
    }

    async fn scan(
        &self,
        span: &Span,
        limit: Option<usize>,
        consistency: ScanConsistency,
        vector: Option<&ScanVector>,
    ) -> ExecResult<EntryStream> {
        self.check_consistency(consistency, vector)?;
        let entries: Vec<ExecResult<IndexEntry>> = self
            .matching(span)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .map(Ok)
            .collect();
        Ok(futures::stream::iter(entries).boxed())
    }
}

#[derive(Default)]
pub struct MemoryIndexer {
    keyspace: String,
    indexes: HashMap<String, Arc<dyn Index>>,
}

impl MemoryIndexer {
    pub fn new(keyspace: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            indexes: HashMap::new(),
        }
    }

    pub fn with_index(self, index: MemoryIndex) -> Self {
        self.with_dyn_index(Arc::new(index))
    }

    /// Adds any index implementation, e.g. a test double.
    pub fn with_dyn_index(mut self, index: Arc<dyn Index>) -> Self {
        self.indexes.insert(index.name().to_string(), index);
        self
    }
}

impl Indexer for MemoryIndexer {
    fn keyspace_id(&self) -> &str {
        &self.keyspace
    }

    fn index_by_name(&self, name: &str) -> ExecResult<Arc<dyn Index>> {
        self.indexes
            .get(name)
            .cloned()
            .ok_or_else(|| ExecError::IndexNotFound(name.to_string()))
    }

    fn indexes(&self) -> Vec<Arc<dyn Index>> {
        let mut all: Vec<Arc<dyn Index>> = self.indexes.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }
}

#[derive(Default)]
pub struct MemoryProvider {
    indexers: HashMap<(String, String), Arc<MemoryIndexer>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_indexer(mut self, namespace: &str, indexer: MemoryIndexer) -> Self {
        self.indexers.insert(
            (namespace.to_string(), indexer.keyspace.clone()),
            Arc::new(indexer),
        );
        self
    }
}

impl IndexerProvider for MemoryProvider {
    fn create(
        &self,
        cluster_url: &str,
        namespace: &str,
        keyspace: &str,
    ) -> ExecResult<Arc<dyn Indexer>> {
        tracing::debug!(
            "Memory provider: opening {}:{} (cluster {})",
            namespace,
            keyspace,
            cluster_url
        );
        let indexer = self
            .indexers
            .get(&(namespace.to_string(), keyspace.to_string()))
            .ok_or_else(|| {
                ExecError::Index(format!("keyspace {}:{} not found", namespace, keyspace))
            })?;
        Ok(indexer.clone())
    }
}
