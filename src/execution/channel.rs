use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::base::OperatorBase;
use super::context::Context;
use super::operator::Operator;
use super::visitor::Visitor;
use crate::error::ExecResult;
use crate::plan::PlanNode;
use crate::value::AnnotatedValue;

/// Pass-through operator: a shared item stream with no work of its own.
///
/// Several producers can write into it; it stays open until stopped and then
/// closes and notifies exactly once, however many producers call `stop`.
pub struct ChannelOp {
    base: OperatorBase,
}

impl ChannelOp {
    pub fn new() -> Self {
        Self {
            base: OperatorBase::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            base: OperatorBase::with_capacity(capacity),
        }
    }

    /// Forwards an item unchanged. Returns false once the channel is closed
    /// or stopped.
    pub async fn send(&self, ctx: &Context, item: AnnotatedValue) -> bool {
        self.base.send_item(ctx, item).await
    }
}

impl Default for ChannelOp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operator for ChannelOp {
    fn name(&self) -> &'static str {
        "Channel"
    }

    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn plan(&self) -> Option<&Arc<PlanNode>> {
        None
    }

    fn accept(&self, visitor: &mut dyn Visitor) -> ExecResult<Value> {
        visitor.visit_channel(self)
    }

    fn copy(&self) -> Arc<dyn Operator> {
        Arc::new(ChannelOp {
            base: self.base.copy(),
        })
    }

    async fn run_once(&self, ctx: &Arc<Context>, _parent: Option<&AnnotatedValue>) {
        self.base
            .run_once(ctx, self.name(), async {
                self.base.stopped(ctx).await;
            })
            .await
    }
}
