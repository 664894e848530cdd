use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;

use super::base::OperatorBase;
use super::context::{panic_message, Context};
use super::operator::Operator;
use super::signal::Stopper;
use super::visitor::Visitor;
use crate::config::DEFAULT_PIPELINE_CAP;
use crate::datastore::{Index, ScanConsistency, ScanVector};
use crate::error::{ExecError, ExecResult};
use crate::plan::{IndexCountScan, PlanKind, PlanNode, PlanSpan};
use crate::value::AnnotatedValue;

/// Counts index entries over every span of the plan, one sub-scan per span
/// running concurrently, and emits the total as a single item.
///
/// A failed span is reported and counted as zero. A total that does not fit
/// in an `i64` is reported and no item is emitted. If the operator or the
/// query is stopped before every span has reported, nothing is emitted and
/// the outstanding sub-scans are abandoned.
pub struct IndexCountScanOp {
    base: OperatorBase,
    plan: Arc<PlanNode>,
}

impl IndexCountScanOp {
    pub fn new(plan: Arc<PlanNode>) -> ExecResult<Self> {
        Self::with_capacity(plan, DEFAULT_PIPELINE_CAP)
    }

    pub fn with_capacity(plan: Arc<PlanNode>, capacity: usize) -> ExecResult<Self> {
        if !matches!(plan.kind(), PlanKind::IndexCountScan(_)) {
            return Err(ExecError::ShapeMismatch(format!(
                "IndexCountScan operator cannot run a {} plan",
                plan.name()
            )));
        }
        Ok(Self {
            base: OperatorBase::with_capacity(capacity),
            plan,
        })
    }

    pub fn scan(&self) -> &IndexCountScan {
        match self.plan.kind() {
            PlanKind::IndexCountScan(scan) => scan,
            other => unreachable!("IndexCountScanOp holds a {} plan", other.name()),
        }
    }

    async fn count_spans(&self, ctx: &Arc<Context>, parent: Option<&AnnotatedValue>) {
        let scan = self.scan();
        let spans = scan.spans();
        let term = scan.term();
        let vector = ctx.scan_vector(&term.namespace, &term.keyspace);

        let mut pending = spans.len();
        // Room for every partial, so a sub-scan never blocks on deposit even
        // after the aggregator has walked away.
        let (tx, mut rx) = mpsc::channel::<i64>(pending.max(1));
        let stopper = self.base.stopper(ctx);

        for (span_no, span) in spans.iter().enumerate() {
            let sub = SubScan {
                index: scan.index().clone(),
                span: span.clone(),
                span_no,
                parent: parent.cloned(),
                consistency: ctx.consistency(),
                vector: vector.clone(),
                ctx: ctx.clone(),
                stopper: stopper.clone(),
                results: tx.clone(),
            };
            tokio::spawn(sub.run());
        }
        drop(tx);

        let mut count: i64 = 0;
        while pending > 0 {
            if stopper.is_stopped() {
                return;
            }
            tokio::select! {
                partial = rx.recv() => match partial {
                    Some(c) => {
                        count = match count.checked_add(c) {
                            Some(sum) => sum,
                            None => {
                                ctx.error(ExecError::evaluation(
                                    format!("adding {} to {} overflows", c, count),
                                    "scan_count()",
                                ));
                                return;
                            }
                        };
                        pending -= 1;
                    }
                    None => {
                        // Every sub-scan exited without depositing, which only
                        // happens once the operator has been stopped.
                        return;
                    }
                },
                _ = stopper.stopped() => return,
            }
        }

        tracing::debug!(
            "IndexCountScan: {} spans on {} counted {}",
            spans.len(),
            scan.index().name(),
            count
        );
        self.base.send_item(ctx, AnnotatedValue::new(count)).await;
    }
}

struct SubScan {
    index: Arc<dyn Index>,
    span: PlanSpan,
    span_no: usize,
    parent: Option<AnnotatedValue>,
    consistency: ScanConsistency,
    vector: Option<Arc<ScanVector>>,
    ctx: Arc<Context>,
    stopper: Stopper,
    results: mpsc::Sender<i64>,
}

impl SubScan {
    async fn run(self) {
        let work = AssertUnwindSafe(self.count()).catch_unwind();
        let count = tokio::select! {
            biased;
            _ = self.stopper.stopped() => return,
            outcome = work => match outcome {
                Ok(Ok(count)) => count,
                Ok(Err(err)) => {
                    tracing::warn!("IndexCountScan: span {} failed: {}", self.span_no, err);
                    self.ctx.error(ExecError::evaluation(
                        err,
                        format!("scan_count() span {}", self.span_no),
                    ));
                    0
                }
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    tracing::error!("IndexCountScan: span {} panicked: {}", self.span_no, msg);
                    self.ctx.error(ExecError::Internal(format!(
                        "panic in scan_count() span {}: {}",
                        self.span_no, msg
                    )));
                    0
                }
            },
        };
        // The aggregator may already be gone; a late partial is simply dropped.
        let _ = self.results.send(count).await;
    }

    async fn count(&self) -> ExecResult<i64> {
        let span = self.span.evaluate(self.parent.as_ref())?;
        self.index
            .count(&span, self.consistency, self.vector.as_deref())
            .await
    }
}

#[async_trait]
impl Operator for IndexCountScanOp {
    fn name(&self) -> &'static str {
        "IndexCountScan"
    }

    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn plan(&self) -> Option<&Arc<PlanNode>> {
        Some(&self.plan)
    }

    fn accept(&self, visitor: &mut dyn Visitor) -> ExecResult<Value> {
        visitor.visit_index_count_scan(self)
    }

    fn copy(&self) -> Arc<dyn Operator> {
        Arc::new(IndexCountScanOp {
            base: self.base.copy(),
            plan: self.plan.clone(),
        })
    }

    async fn run_once(&self, ctx: &Arc<Context>, parent: Option<&AnnotatedValue>) {
        self.base
            .run_once(ctx, self.name(), async {
                let _timer = self.base.time_phase(ctx, &self.plan);
                self.count_spans(ctx, parent).await;
            })
            .await
    }
}
