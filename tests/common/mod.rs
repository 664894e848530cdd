//! Common test utilities for operator tests
//!
//! Provides shared helpers for:
//! - Scripted indexes whose spans succeed, fail, panic or hang on demand
//! - Building count-scan plans and query contexts

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use streamexec::datastore::{EntryStream, Index, ScanConsistency, ScanVector, Span};
use streamexec::plan::{IndexCountScan, KeyspaceTerm, PlanSpan};
use streamexec::{Context, ExecError, ExecResult, PlanArena, PlanId, PlanKind};

/// What a scripted span does when counted.
#[derive(Debug, Clone)]
pub enum Partition {
    Count { count: i64, delay: Duration },
    Fail(String),
    Panic(String),
    Hang,
}

impl Partition {
    pub fn count(count: i64) -> Self {
        Partition::Count {
            count,
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(count: i64, delay: Duration) -> Self {
        Partition::Count { count, delay }
    }
}

/// An index whose behavior is scripted per span. Spans are addressed by
/// their low bound, which must be an integer partition number.
pub struct ScriptedIndex {
    name: String,
    partitions: HashMap<i64, Partition>,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl ScriptedIndex {
    pub fn new(partitions: Vec<Partition>) -> Self {
        Self {
            name: "scripted".to_string(),
            partitions: partitions
                .into_iter()
                .enumerate()
                .map(|(i, p)| (i as i64, p))
                .collect(),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    pub fn counts(counts: &[i64]) -> Self {
        Self::new(counts.iter().map(|c| Partition::count(*c)).collect())
    }

    /// Number of spans that have started counting.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of spans that returned a count.
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn span_count(&self) -> usize {
        self.partitions.len()
    }

    fn partition(&self, span: &Span) -> ExecResult<&Partition> {
        let no = span
            .low
            .as_ref()
            .and_then(Value::as_i64)
            .ok_or_else(|| ExecError::Index(format!("unscripted span {}", span)))?;
        self.partitions
            .get(&no)
            .ok_or_else(|| ExecError::Index(format!("unscripted partition {}", no)))
    }
}

#[async_trait]
impl Index for ScriptedIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn keyspace_id(&self) -> &str {
        "events"
    }

    async fn count(
        &self,
        span: &Span,
        _consistency: ScanConsistency,
        _vector: Option<&ScanVector>,
    ) -> ExecResult<i64> {
        self.started.fetch_add(1, Ordering::SeqCst);
        match self.partition(span)? {
            Partition::Count { count, delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                self.finished.fetch_add(1, Ordering::SeqCst);
                Ok(*count)
            }
            Partition::Fail(msg) => Err(ExecError::Index(msg.clone())),
            Partition::Panic(msg) => panic!("{}", msg),
            Partition::Hang => futures::future::pending().await,
        }
    }

    async fn scan(
        &self,
        span: &Span,
        _limit: Option<usize>,
        _consistency: ScanConsistency,
        _vector: Option<&ScanVector>,
    ) -> ExecResult<EntryStream> {
        self.partition(span)?;
        Ok(futures::stream::empty().boxed())
    }
}

/// One exact span per partition, numbered from zero.
pub fn partition_spans(n: usize) -> Vec<PlanSpan> {
    (0..n).map(|i| PlanSpan::exact(json!(i))).collect()
}

/// A plan holding a single count scan over every scripted partition.
pub fn count_scan_plan(index: Arc<ScriptedIndex>) -> (PlanArena, PlanId) {
    let spans = partition_spans(index.span_count());
    let mut arena = PlanArena::new();
    let id = arena
        .add(PlanKind::IndexCountScan(IndexCountScan::new(
            index,
            KeyspaceTerm::new("default", "events"),
            spans,
        )))
        .expect("Failed to add count scan");
    arena.set_root(id).expect("Failed to set root");
    (arena, id)
}

pub fn test_context() -> Arc<Context> {
    Arc::new(Context::new().with_pipeline_cap(16))
}

/// Extracts the integer payload of a single-item result.
pub fn single_count(items: &[streamexec::AnnotatedValue]) -> i64 {
    assert_eq!(items.len(), 1, "expected exactly one item, got {:?}", items);
    items[0].value().as_i64().expect("count item is not an integer")
}
