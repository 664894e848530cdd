//! Compiled scan descriptions: keyspace terms, span expressions and the
//! index scan plans built on them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datastore::{Inclusion, Index, Span};
use crate::error::{ExecError, ExecResult};
use crate::value::AnnotatedValue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspaceTerm {
    pub namespace: String,
    pub keyspace: String,
    pub alias: Option<String>,
}

impl KeyspaceTerm {
    pub fn new(namespace: impl Into<String>, keyspace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            keyspace: keyspace.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// A span bound as compiled: either a constant or a field of the operator's
/// input (the correlated parent value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanExpr {
    Literal(Value),
    Parent(String),
}

impl SpanExpr {
    /// Scalars and arrays (composite keys) are valid bounds; objects are not.
    pub fn evaluate(&self, parent: Option<&AnnotatedValue>) -> ExecResult<Value> {
        let value = match self {
            SpanExpr::Literal(v) => v.clone(),
            SpanExpr::Parent(field) => {
                let parent = parent.ok_or_else(|| {
                    ExecError::ShapeMismatch(format!(
                        "span bound references parent field '{}' but no input was given",
                        field
                    ))
                })?;
                if !parent.value().is_object() {
                    return Err(ExecError::ShapeMismatch(format!(
                        "span bound references parent field '{}' but input is not an object",
                        field
                    )));
                }
                parent.field(field).cloned().ok_or_else(|| {
                    ExecError::ShapeMismatch(format!("input has no field '{}'", field))
                })?
            }
        };
        if value.is_object() {
            return Err(ExecError::ShapeMismatch(format!(
                "span bound must be a scalar or array, got {}",
                value
            )));
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanSpan {
    pub low: Option<SpanExpr>,
    pub high: Option<SpanExpr>,
    pub inclusion: Inclusion,
}

impl PlanSpan {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn exact(key: Value) -> Self {
        Self {
            low: Some(SpanExpr::Literal(key.clone())),
            high: Some(SpanExpr::Literal(key)),
            inclusion: Inclusion::Both,
        }
    }

    pub fn range(low: Option<SpanExpr>, high: Option<SpanExpr>, inclusion: Inclusion) -> Self {
        Self {
            low,
            high,
            inclusion,
        }
    }

    /// Resolves the bounds against the run input.
    pub fn evaluate(&self, parent: Option<&AnnotatedValue>) -> ExecResult<Span> {
        let low = self.low.as_ref().map(|e| e.evaluate(parent)).transpose()?;
        let high = self.high.as_ref().map(|e| e.evaluate(parent)).transpose()?;
        Ok(Span::range(low, high, self.inclusion))
    }
}

/// Count of the entries of an index across a set of spans.
#[derive(Clone)]
pub struct IndexCountScan {
    index: Arc<dyn Index>,
    term: KeyspaceTerm,
    spans: Vec<PlanSpan>,
}

impl IndexCountScan {
    pub fn new(index: Arc<dyn Index>, term: KeyspaceTerm, spans: Vec<PlanSpan>) -> Self {
        Self { index, term, spans }
    }

    pub fn index(&self) -> &Arc<dyn Index> {
        &self.index
    }

    pub fn term(&self) -> &KeyspaceTerm {
        &self.term
    }

    pub fn spans(&self) -> &[PlanSpan] {
        &self.spans
    }
}

impl fmt::Debug for IndexCountScan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexCountScan")
            .field("index", &self.index.name())
            .field("term", &self.term)
            .field("spans", &self.spans)
            .finish()
    }
}

/// Entries of an index across a set of spans, in span order.
#[derive(Clone)]
pub struct IndexScan {
    index: Arc<dyn Index>,
    term: KeyspaceTerm,
    spans: Vec<PlanSpan>,
    limit: Option<usize>,
}

impl IndexScan {
    pub fn new(index: Arc<dyn Index>, term: KeyspaceTerm, spans: Vec<PlanSpan>) -> Self {
        Self {
            index,
            term,
            spans,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn index(&self) -> &Arc<dyn Index> {
        &self.index
    }

    pub fn term(&self) -> &KeyspaceTerm {
        &self.term
    }

    pub fn spans(&self) -> &[PlanSpan] {
        &self.spans
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

impl fmt::Debug for IndexScan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexScan")
            .field("index", &self.index.name())
            .field("term", &self.term)
            .field("spans", &self.spans)
            .field("limit", &self.limit)
            .finish()
    }
}
