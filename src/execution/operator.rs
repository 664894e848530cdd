use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::base::{Listener, OperatorBase};
use super::context::Context;
use super::stream::ItemReceiver;
use super::visitor::Visitor;
use crate::error::{ExecError, ExecResult};
use crate::plan::PlanNode;
use crate::value::AnnotatedValue;

/// A runtime instance of one plan step, producing a stream of items.
///
/// Operators are created fresh for every query execution. `run_once` may be
/// called from several places (for example when two downstream branches
/// share an operator); only the first call does any work.
#[async_trait]
pub trait Operator: Send + Sync {
    fn name(&self) -> &'static str;

    fn base(&self) -> &OperatorBase;

    /// The compiled node this operator executes, if it has one.
    fn plan(&self) -> Option<&Arc<PlanNode>>;

    fn accept(&self, visitor: &mut dyn Visitor) -> ExecResult<Value>;

    /// A fresh, not-yet-run operator bound to the same plan node.
    fn copy(&self) -> Arc<dyn Operator>;

    async fn run_once(&self, ctx: &Arc<Context>, parent: Option<&AnnotatedValue>);

    fn stop(&self) {
        self.base().stop();
    }

    fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.base().add_listener(listener, self.name());
    }

    fn take_output(&self) -> Option<ItemReceiver> {
        self.base().take_output()
    }
}

/// Runs `op` on its own task.
pub fn spawn_operator(
    op: Arc<dyn Operator>,
    ctx: Arc<Context>,
    parent: Option<AnnotatedValue>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        op.run_once(&ctx, parent.as_ref()).await;
    })
}

/// Runs `root` to completion and returns every item it produced.
///
/// Items already produced when the query is stopped are still returned.
pub async fn execute(
    root: Arc<dyn Operator>,
    ctx: Arc<Context>,
    parent: Option<AnnotatedValue>,
) -> ExecResult<Vec<AnnotatedValue>> {
    let output = root.take_output().ok_or_else(|| {
        ExecError::ShapeMismatch(format!("{} output is already consumed", root.name()))
    })?;
    let handle = spawn_operator(root, ctx, parent);
    let items = output.drain().await;
    handle
        .await
        .map_err(|e| ExecError::Internal(format!("operator task failed: {}", e)))?;
    Ok(items)
}
