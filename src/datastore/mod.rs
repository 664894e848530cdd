//! Storage/index collaborator interfaces consumed by the execution core.
//!
//! This module contains:
//! - Index / Indexer / IndexerProvider: the pluggable index abstraction
//! - Span: an evaluated key range handed to an index
//! - ScanConsistency, ScanVector: consistency parameters for count and scan
//! - registry: the startup-built provider registry
//! - memory: an in-process implementation used by the CLI and tests

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExecError, ExecResult};

pub mod memory;
pub mod registry;

pub use memory::{MemoryIndex, MemoryIndexer, MemoryProvider};
pub use registry::{IndexerRegistry, IndexerRegistryBuilder};

/// One entry produced by an index scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub entry_key: Value,
    pub primary_key: String,
}

pub type EntryStream = BoxStream<'static, ExecResult<IndexEntry>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanConsistency {
    #[default]
    NotBounded,
    AtPlus,
    RequestPlus,
}

impl FromStr for ScanConsistency {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "not_bounded" | "none" => Ok(ScanConsistency::NotBounded),
            "at_plus" => Ok(ScanConsistency::AtPlus),
            "request_plus" => Ok(ScanConsistency::RequestPlus),
            other => Err(ExecError::Config(format!(
                "unknown scan consistency '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ScanConsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanConsistency::NotBounded => "not_bounded",
            ScanConsistency::AtPlus => "at_plus",
            ScanConsistency::RequestPlus => "request_plus",
        };
        f.write_str(name)
    }
}

/// Sequence position of one partition (vbucket) that a scan must have seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub vbucket: u16,
    pub seqno: u64,
    pub guard: String,
}

/// Staleness bound for `AtPlus` scans.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanVector {
    entries: Vec<VectorEntry>,
}

impl ScanVector {
    pub fn new(entries: Vec<VectorEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[VectorEntry] {
        &self.entries
    }

    /// Highest sequence number the vector requires, if any.
    pub fn max_seqno(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.seqno).max()
    }
}

/// Resolves the scan vector a query must honour for a keyspace.
pub trait ScanVectorSource: Send + Sync {
    fn scan_vector(&self, namespace: &str, keyspace: &str) -> Option<Arc<ScanVector>>;
}

/// Source for queries that carry no staleness bound.
#[derive(Debug, Default)]
pub struct NoScanVectors;

impl ScanVectorSource for NoScanVectors {
    fn scan_vector(&self, _namespace: &str, _keyspace: &str) -> Option<Arc<ScanVector>> {
        None
    }
}

/// Fixed per-keyspace vectors, as supplied with a request.
#[derive(Debug, Default)]
pub struct KeyspaceScanVectors {
    vectors: HashMap<(String, String), Arc<ScanVector>>,
}

impl KeyspaceScanVectors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, namespace: &str, keyspace: &str, vector: ScanVector) -> Self {
        self.vectors
            .insert((namespace.to_string(), keyspace.to_string()), Arc::new(vector));
        self
    }
}

impl ScanVectorSource for KeyspaceScanVectors {
    fn scan_vector(&self, namespace: &str, keyspace: &str) -> Option<Arc<ScanVector>> {
        self.vectors
            .get(&(namespace.to_string(), keyspace.to_string()))
            .cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inclusion {
    Neither,
    Low,
    High,
    #[default]
    Both,
}

impl Inclusion {
    pub fn includes_low(self) -> bool {
        matches!(self, Inclusion::Low | Inclusion::Both)
    }

    pub fn includes_high(self) -> bool {
        matches!(self, Inclusion::High | Inclusion::Both)
    }
}

/// An evaluated key range. Missing bounds are unbounded.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Span {
    pub low: Option<Value>,
    pub high: Option<Value>,
    pub inclusion: Inclusion,
}

impl Span {
    /// A span covering every key.
    pub fn full() -> Self {
        Self::default()
    }

    pub fn exact(key: Value) -> Self {
        Self {
            low: Some(key.clone()),
            high: Some(key),
            inclusion: Inclusion::Both,
        }
    }

    pub fn range(low: Option<Value>, high: Option<Value>, inclusion: Inclusion) -> Self {
        Self {
            low,
            high,
            inclusion,
        }
    }

    pub fn contains(&self, key: &Value) -> bool {
        if let Some(low) = &self.low {
            match collate(key, low) {
                Ordering::Less => return false,
                Ordering::Equal if !self.inclusion.includes_low() => return false,
                _ => {}
            }
        }
        if let Some(high) = &self.high {
            match collate(key, high) {
                Ordering::Greater => return false,
                Ordering::Equal if !self.inclusion.includes_high() => return false,
                _ => {}
            }
        }
        true
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.inclusion.includes_low() { '[' } else { '(' };
        let close = if self.inclusion.includes_high() { ']' } else { ')' };
        let bound = |b: &Option<Value>| b.as_ref().map_or("*".to_string(), |v| v.to_string());
        write!(f, "{}{}, {}{}", open, bound(&self.low), bound(&self.high), close)
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Exact value of an integer key; floats return `None`.
fn integer(n: &serde_json::Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// Total ordering of index keys: null < bool < number < string < array < object.
pub fn collate(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => match (integer(a), integer(b)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => {
                let a_f64 = a.as_f64().unwrap_or(0.0);
                let b_f64 = b.as_f64().unwrap_or(0.0);
                a_f64.partial_cmp(&b_f64).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                let ord = collate(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            let ord = a.len().cmp(&b.len());
            if ord != Ordering::Equal {
                return ord;
            }
            let mut a_keys: Vec<&String> = a.keys().collect();
            let mut b_keys: Vec<&String> = b.keys().collect();
            a_keys.sort();
            b_keys.sort();
            for (ka, kb) in a_keys.into_iter().zip(b_keys) {
                let ord = ka.cmp(kb).then_with(|| collate(&a[ka], &b[kb]));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// A secondary or primary index over one keyspace.
///
/// Failures are returned as values; the execution core reports them on the
/// query's error sink rather than propagating them.
#[async_trait]
pub trait Index: Send + Sync {
    fn name(&self) -> &str;

    fn keyspace_id(&self) -> &str;

    async fn count(
        &self,
        span: &Span,
        consistency: ScanConsistency,
        vector: Option<&ScanVector>,
    ) -> ExecResult<i64>;

    async fn scan(
        &self,
        span: &Span,
        limit: Option<usize>,
        consistency: ScanConsistency,
        vector: Option<&ScanVector>,
    ) -> ExecResult<EntryStream>;
}

/// The set of indexes defined on one keyspace.
pub trait Indexer: Send + Sync {
    fn keyspace_id(&self) -> &str;

    fn index_by_name(&self, name: &str) -> ExecResult<Arc<dyn Index>>;

    fn indexes(&self) -> Vec<Arc<dyn Index>>;
}

/// Factory for indexers backed by one storage provider.
pub trait IndexerProvider: Send + Sync {
    fn create(
        &self,
        cluster_url: &str,
        namespace: &str,
        keyspace: &str,
    ) -> ExecResult<Arc<dyn Indexer>>;
}
