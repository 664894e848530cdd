use std::sync::Arc;

use super::operator::Operator;
use super::scan_index::IndexScanOp;
use super::scan_index_count::IndexCountScanOp;
use super::union_all::UnionAllOp;
use crate::error::{ExecError, ExecResult};
use crate::plan::{PlanArena, PlanId, PlanKind};

/// Instantiates a fresh operator tree for the subtree rooted at `id`.
///
/// Called once per query execution; the plan itself is never modified, so a
/// prepared plan can be built any number of times.
pub fn build_operator(
    arena: &PlanArena,
    id: PlanId,
    capacity: usize,
) -> ExecResult<Arc<dyn Operator>> {
    let node = arena.get(id)?;
    let op: Arc<dyn Operator> = match node.kind() {
        PlanKind::IndexCountScan(_) => {
            Arc::new(IndexCountScanOp::with_capacity(node.clone(), capacity)?)
        }
        PlanKind::IndexScan(_) => Arc::new(IndexScanOp::with_capacity(node.clone(), capacity)?),
        PlanKind::UnionAll(union) => {
            let children = union
                .children()
                .iter()
                .map(|child| build_operator(arena, *child, capacity))
                .collect::<ExecResult<Vec<_>>>()?;
            Arc::new(UnionAllOp::with_capacity(node.clone(), children, capacity)?)
        }
    };
    Ok(op)
}

/// Builds the operator tree for the arena's root.
pub fn build_root(arena: &PlanArena, capacity: usize) -> ExecResult<Arc<dyn Operator>> {
    let root = arena
        .root()
        .ok_or_else(|| ExecError::ShapeMismatch("plan has no root".to_string()))?;
    build_operator(arena, root, capacity)
}
