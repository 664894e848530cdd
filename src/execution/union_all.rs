use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use super::base::{Listener, OperatorBase};
use super::context::Context;
use super::operator::{spawn_operator, Operator};
use super::visitor::Visitor;
use crate::config::DEFAULT_PIPELINE_CAP;
use crate::error::{ExecError, ExecResult};
use crate::plan::{PlanKind, PlanNode};
use crate::value::AnnotatedValue;

/// Listener that forwards child completions to the waiting parent.
struct ChildTracker {
    tx: mpsc::UnboundedSender<String>,
}

impl Listener for ChildTracker {
    fn child_stopped(&self, child: &str) {
        let _ = self.tx.send(child.to_string());
    }
}

/// Stops every child when dropped, so a union that is aborted or panics
/// does not leave its children running.
struct StopChildren<'a> {
    union: &'a UnionAllOp,
}

impl Drop for StopChildren<'_> {
    fn drop(&mut self) {
        self.union.stop_children();
    }
}

/// Runs every child concurrently and merges their items into one stream.
/// Finishes after all children have closed their streams and notified.
pub struct UnionAllOp {
    base: OperatorBase,
    plan: Arc<PlanNode>,
    children: Vec<Arc<dyn Operator>>,
}

impl UnionAllOp {
    pub fn new(plan: Arc<PlanNode>, children: Vec<Arc<dyn Operator>>) -> ExecResult<Self> {
        Self::with_capacity(plan, children, DEFAULT_PIPELINE_CAP)
    }

    pub fn with_capacity(
        plan: Arc<PlanNode>,
        children: Vec<Arc<dyn Operator>>,
        capacity: usize,
    ) -> ExecResult<Self> {
        let expected = match plan.kind() {
            PlanKind::UnionAll(union) => union.children().len(),
            _ => {
                return Err(ExecError::ShapeMismatch(format!(
                    "UnionAll operator cannot run a {} plan",
                    plan.name()
                )))
            }
        };
        if expected != children.len() {
            return Err(ExecError::ShapeMismatch(format!(
                "UnionAll plan has {} children but {} operators were given",
                expected,
                children.len()
            )));
        }
        Ok(Self {
            base: OperatorBase::with_capacity(capacity),
            plan,
            children,
        })
    }

    pub fn children(&self) -> &[Arc<dyn Operator>] {
        &self.children
    }

    fn stop_children(&self) {
        for child in &self.children {
            child.stop();
        }
    }

    async fn merge(&self, ctx: &Arc<Context>, parent: Option<&AnnotatedValue>) {
        let _guard = StopChildren { union: self };
        let (tx, mut notices) = mpsc::unbounded_channel();
        let tracker: Arc<dyn Listener> = Arc::new(ChildTracker { tx });

        let mut inputs = Vec::with_capacity(self.children.len());
        for child in &self.children {
            child.add_listener(tracker.clone());
            match child.take_output() {
                Some(rx) => inputs.push(rx),
                None => ctx.error(ExecError::ShapeMismatch(format!(
                    "UnionAll child {} output is already consumed",
                    child.name()
                ))),
            }
        }
        drop(tracker);

        for child in &self.children {
            spawn_operator(child.clone(), ctx.clone(), parent.cloned());
        }

        let mut merged = futures::stream::select_all(inputs);
        let mut forwarded: u64 = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.base.stopped(ctx) => return,
                next = merged.next() => next,
            };
            match next {
                Some(item) => {
                    if !self.base.send_item(ctx, item).await {
                        return;
                    }
                    forwarded += 1;
                }
                None => break,
            }
        }
        ctx.add_phase_count(self.name(), forwarded);

        // Streams are closed before listeners fire; wait for every child to
        // finish its completion sequence too.
        let mut pending = self.children.len();
        while pending > 0 {
            tokio::select! {
                biased;
                _ = self.base.stopped(ctx) => return,
                notice = notices.recv() => match notice {
                    Some(child) => {
                        tracing::debug!("UnionAll: child {} finished", child);
                        pending -= 1;
                    }
                    None => break,
                },
            }
        }
    }
}

#[async_trait]
impl Operator for UnionAllOp {
    fn name(&self) -> &'static str {
        "UnionAll"
    }

    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn plan(&self) -> Option<&Arc<PlanNode>> {
        Some(&self.plan)
    }

    fn accept(&self, visitor: &mut dyn Visitor) -> ExecResult<Value> {
        visitor.visit_union_all(self)
    }

    fn copy(&self) -> Arc<dyn Operator> {
        Arc::new(UnionAllOp {
            base: self.base.copy(),
            plan: self.plan.clone(),
            children: self.children.iter().map(|c| c.copy()).collect(),
        })
    }

    async fn run_once(&self, ctx: &Arc<Context>, parent: Option<&AnnotatedValue>) {
        self.base
            .run_once(ctx, self.name(), async {
                let _timer = self.base.time_phase(ctx, &self.plan);
                self.merge(ctx, parent).await;
            })
            .await
    }
}
