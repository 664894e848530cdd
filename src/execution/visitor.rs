//! Operator tree traversal.
//!
//! External tooling (explain, profiling output) walks an operator tree
//! through [`Visitor`], so operators never depend on an output format.

use serde_json::{json, Map, Value};

use super::channel::ChannelOp;
use super::scan_index::IndexScanOp;
use super::scan_index_count::IndexCountScanOp;
use super::union_all::UnionAllOp;
use super::Operator;
use crate::error::ExecResult;
use crate::plan::{KeyspaceTerm, PlanNode};

pub trait Visitor {
    fn visit_channel(&mut self, op: &ChannelOp) -> ExecResult<Value>;
    fn visit_index_count_scan(&mut self, op: &IndexCountScanOp) -> ExecResult<Value>;
    fn visit_index_scan(&mut self, op: &IndexScanOp) -> ExecResult<Value>;
    fn visit_union_all(&mut self, op: &UnionAllOp) -> ExecResult<Value>;
}

/// Renders an operator tree as JSON. With `profile` set, each node also
/// reports the cumulative time recorded on its plan node.
#[derive(Debug, Default)]
pub struct ExplainVisitor {
    profile: bool,
}

impl ExplainVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile() -> Self {
        Self { profile: true }
    }

    fn node(&self, op: &dyn Operator, plan: Option<&PlanNode>) -> Map<String, Value> {
        let mut obj = Map::new();
        obj.insert("#operator".to_string(), json!(op.name()));
        if let Some(plan) = plan {
            obj.insert("readonly".to_string(), json!(plan.readonly()));
            if self.profile {
                obj.insert("#time".to_string(), json!(format!("{:?}", plan.duration())));
            }
        }
        obj
    }

    fn keyspace(obj: &mut Map<String, Value>, term: &KeyspaceTerm) {
        obj.insert("namespace".to_string(), json!(term.namespace));
        obj.insert("keyspace".to_string(), json!(term.keyspace));
        if let Some(alias) = &term.alias {
            obj.insert("as".to_string(), json!(alias));
        }
    }
}

impl Visitor for ExplainVisitor {
    fn visit_channel(&mut self, op: &ChannelOp) -> ExecResult<Value> {
        Ok(Value::Object(self.node(op, None)))
    }

    fn visit_index_count_scan(&mut self, op: &IndexCountScanOp) -> ExecResult<Value> {
        let mut obj = self.node(op, op.plan().map(|p| p.as_ref()));
        let scan = op.scan();
        obj.insert("index".to_string(), json!(scan.index().name()));
        Self::keyspace(&mut obj, scan.term());
        obj.insert("spans".to_string(), serde_json::to_value(scan.spans())?);
        Ok(Value::Object(obj))
    }

    fn visit_index_scan(&mut self, op: &IndexScanOp) -> ExecResult<Value> {
        let mut obj = self.node(op, op.plan().map(|p| p.as_ref()));
        let scan = op.scan();
        obj.insert("index".to_string(), json!(scan.index().name()));
        Self::keyspace(&mut obj, scan.term());
        obj.insert("spans".to_string(), serde_json::to_value(scan.spans())?);
        if let Some(limit) = scan.limit() {
            obj.insert("limit".to_string(), json!(limit));
        }
        Ok(Value::Object(obj))
    }

    fn visit_union_all(&mut self, op: &UnionAllOp) -> ExecResult<Value> {
        let mut obj = self.node(op, op.plan().map(|p| p.as_ref()));
        let children = op
            .children()
            .iter()
            .map(|child| child.accept(self))
            .collect::<ExecResult<Vec<_>>>()?;
        obj.insert("children".to_string(), Value::Array(children));
        Ok(Value::Object(obj))
    }
}
