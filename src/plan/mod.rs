//! Compiled plan nodes.
//!
//! Plans are immutable once compiled and live in a [`PlanArena`], addressed by
//! [`PlanId`]. Operators built for a query execution hold an `Arc` to their
//! node; the only field touched during execution is the node's
//! [`PlanTiming`] counter.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExecError, ExecResult};

pub mod scan;
pub mod timing;

pub use scan::{IndexCountScan, IndexScan, KeyspaceTerm, PlanSpan, SpanExpr};
pub use timing::PlanTiming;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanId(usize);

impl PlanId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionAll {
    children: Vec<PlanId>,
}

impl UnionAll {
    pub fn new(children: Vec<PlanId>) -> Self {
        Self { children }
    }

    pub fn children(&self) -> &[PlanId] {
        &self.children
    }
}

#[derive(Debug, Clone)]
pub enum PlanKind {
    IndexCountScan(IndexCountScan),
    IndexScan(IndexScan),
    UnionAll(UnionAll),
}

impl PlanKind {
    pub fn name(&self) -> &'static str {
        match self {
            PlanKind::IndexCountScan(_) => "IndexCountScan",
            PlanKind::IndexScan(_) => "IndexScan",
            PlanKind::UnionAll(_) => "UnionAll",
        }
    }

    pub fn readonly(&self) -> bool {
        match self {
            PlanKind::IndexCountScan(_) | PlanKind::IndexScan(_) | PlanKind::UnionAll(_) => true,
        }
    }
}

#[derive(Debug)]
pub struct PlanNode {
    id: PlanId,
    kind: PlanKind,
    timing: PlanTiming,
}

impl PlanNode {
    pub fn id(&self) -> PlanId {
        self.id
    }

    pub fn kind(&self) -> &PlanKind {
        &self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn readonly(&self) -> bool {
        self.timing.readonly()
    }

    pub fn add_time(&self, t: Duration) {
        self.timing.add_time(t);
    }

    pub fn duration(&self) -> Duration {
        self.timing.duration()
    }
}

/// Owns every node of a compiled plan.
#[derive(Debug, Default)]
pub struct PlanArena {
    nodes: Vec<Arc<PlanNode>>,
    root: Option<PlanId>,
}

impl PlanArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. Children referenced by the node must already be present,
    /// which keeps the plan acyclic.
    pub fn add(&mut self, kind: PlanKind) -> ExecResult<PlanId> {
        if let PlanKind::UnionAll(union) = &kind {
            if union.children().is_empty() {
                return Err(ExecError::ShapeMismatch(
                    "UnionAll requires at least one child".to_string(),
                ));
            }
            if let Some(missing) = union.children().iter().find(|c| c.0 >= self.nodes.len()) {
                return Err(ExecError::ShapeMismatch(format!(
                    "UnionAll child {:?} is not in the plan",
                    missing
                )));
            }
        }
        let id = PlanId(self.nodes.len());
        let timing = PlanTiming::new(kind.readonly());
        self.nodes.push(Arc::new(PlanNode { id, kind, timing }));
        Ok(id)
    }

    pub fn set_root(&mut self, id: PlanId) -> ExecResult<()> {
        self.get(id)?;
        self.root = Some(id);
        Ok(())
    }

    pub fn root(&self) -> Option<PlanId> {
        self.root
    }

    pub fn get(&self, id: PlanId) -> ExecResult<Arc<PlanNode>> {
        self.nodes
            .get(id.0)
            .cloned()
            .ok_or_else(|| ExecError::ShapeMismatch(format!("plan node {:?} does not exist", id)))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sum of the cumulative time of every node.
    pub fn total_time(&self) -> Duration {
        self.nodes.iter().map(|n| n.duration()).sum()
    }
}
