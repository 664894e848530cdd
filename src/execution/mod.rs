//! Operator runtime.
//!
//! This module contains:
//! - signal / context: per-query stop signal, accounting and error sink
//! - base / operator: the lifecycle every operator shares
//! - stream: bounded item streams between operators
//! - channel, scan_index_count, scan_index, union_all: operator kinds
//! - visitor: tree traversal for explain/profile output
//! - build: operator trees from compiled plans

mod base;
mod build;
mod channel;
mod context;
mod operator;
mod scan_index;
mod scan_index_count;
mod signal;
mod stream;
mod union_all;
mod visitor;

pub use base::{Listener, OperatorBase, PhaseTimer};
pub use build::{build_operator, build_root};
pub use channel::ChannelOp;
pub use context::{Context, RequestState, RequestSummary, StopCause};
pub use operator::{execute, spawn_operator, Operator};
pub use scan_index::IndexScanOp;
pub use scan_index_count::IndexCountScanOp;
pub use signal::{Signal, Stopper};
pub use stream::{item_channel, ItemReceiver, ItemSender};
pub use union_all::UnionAllOp;
pub use visitor::{ExplainVisitor, Visitor};
