use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use super::base::OperatorBase;
use super::context::Context;
use super::operator::Operator;
use super::visitor::Visitor;
use crate::config::DEFAULT_PIPELINE_CAP;
use crate::error::{ExecError, ExecResult};
use crate::plan::{IndexScan, PlanKind, PlanNode};
use crate::value::AnnotatedValue;

/// Streams the entries of every span, in span order, as items of the form
/// `{"id": .., "key": ..}` with a `meta` attachment holding the primary key.
pub struct IndexScanOp {
    base: OperatorBase,
    plan: Arc<PlanNode>,
}

impl IndexScanOp {
    pub fn new(plan: Arc<PlanNode>) -> ExecResult<Self> {
        Self::with_capacity(plan, DEFAULT_PIPELINE_CAP)
    }

    pub fn with_capacity(plan: Arc<PlanNode>, capacity: usize) -> ExecResult<Self> {
        if !matches!(plan.kind(), PlanKind::IndexScan(_)) {
            return Err(ExecError::ShapeMismatch(format!(
                "IndexScan operator cannot run a {} plan",
                plan.name()
            )));
        }
        Ok(Self {
            base: OperatorBase::with_capacity(capacity),
            plan,
        })
    }

    pub fn scan(&self) -> &IndexScan {
        match self.plan.kind() {
            PlanKind::IndexScan(scan) => scan,
            other => unreachable!("IndexScanOp holds a {} plan", other.name()),
        }
    }

    /// Returns the number of items delivered downstream.
    async fn scan_spans(&self, ctx: &Context, parent: Option<&AnnotatedValue>) -> u64 {
        let scan = self.scan();
        let term = scan.term();
        let vector = ctx.scan_vector(&term.namespace, &term.keyspace);
        let stopper = self.base.stopper(ctx);
        let mut remaining = scan.limit();
        let mut sent: u64 = 0;

        for (span_no, plan_span) in scan.spans().iter().enumerate() {
            if remaining == Some(0) || stopper.is_stopped() {
                break;
            }

            let span = match plan_span.evaluate(parent) {
                Ok(span) => span,
                Err(err) => {
                    ctx.error(ExecError::evaluation(err, format!("scan() span {}", span_no)));
                    continue;
                }
            };

            let opened = tokio::select! {
                biased;
                _ = stopper.stopped() => return sent,
                r = scan.index().scan(&span, remaining, ctx.consistency(), vector.as_deref()) => r,
            };
            let mut entries = match opened {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!("IndexScan: span {} failed to open: {}", span_no, err);
                    ctx.error(ExecError::evaluation(err, format!("scan() span {}", span_no)));
                    continue;
                }
            };

            loop {
                let next = tokio::select! {
                    biased;
                    _ = stopper.stopped() => return sent,
                    next = entries.next() => next,
                };
                let entry = match next {
                    None => break,
                    Some(Ok(entry)) => entry,
                    Some(Err(err)) => {
                        ctx.error(ExecError::evaluation(err, format!("scan() span {}", span_no)));
                        break;
                    }
                };

                let mut item = AnnotatedValue::new(json!({
                    "id": entry.primary_key,
                    "key": entry.entry_key,
                }));
                item.set_attachment("meta", json!({ "id": entry.primary_key }));
                if !self.base.send_item(ctx, item).await {
                    return sent;
                }
                sent += 1;

                if let Some(r) = remaining.as_mut() {
                    *r -= 1;
                    if *r == 0 {
                        break;
                    }
                }
            }
        }
        sent
    }
}

#[async_trait]
impl Operator for IndexScanOp {
    fn name(&self) -> &'static str {
        "IndexScan"
    }

    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn plan(&self) -> Option<&Arc<PlanNode>> {
        Some(&self.plan)
    }

    fn accept(&self, visitor: &mut dyn Visitor) -> ExecResult<Value> {
        visitor.visit_index_scan(self)
    }

    fn copy(&self) -> Arc<dyn Operator> {
        Arc::new(IndexScanOp {
            base: self.base.copy(),
            plan: self.plan.clone(),
        })
    }

    async fn run_once(&self, ctx: &Arc<Context>, parent: Option<&AnnotatedValue>) {
        self.base
            .run_once(ctx, self.name(), async {
                let _timer = self.base.time_phase(ctx, &self.plan);
                let sent = self.scan_spans(ctx, parent).await;
                ctx.add_phase_count(self.name(), sent);
            })
            .await
    }
}
